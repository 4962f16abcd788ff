//! Startup/shutdown wiring for the whole bridge (§4.8).

use crate::cli::Cli;
use crate::config::{Config, TransportConfig};
use crate::error::EhsError;
use crate::mqtt::{self, MqttAdapter};
use crate::poller;
use crate::processor::{MessageProcessor, ProtocolLog, PublishEvent};
use crate::producer::Producer;
use crate::repository::Repository;
use crate::transport::{self, NasaFrameCodec, TransportWriter};
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::codec::Decoder;
use tracing::{error, info, warn};

const RECONNECT_BACKOFF: std::time::Duration = std::time::Duration::from_secs(5);

/// Run the bridge until a fatal error or process shutdown signal.
pub async fn run(cli: Cli) -> Result<(), EhsError> {
    let config = Config::load(&cli.configfile)?;
    let repository = Arc::new(Repository::load(&config.general.nasa_repository_file)?);
    info!(points = repository.len(), "repository loaded");

    let protocol_log = match &config.general.protocol_file {
        Some(path) => ProtocolLog::open(path).await?,
        None => ProtocolLog::disabled(),
    };

    let (mqtt_adapter, eventloop) = MqttAdapter::connect(
        &config.mqtt,
        repository.clone(),
        config.general.allow_control,
        config.logging.clone(),
    );

    if cli.clean_known_devices {
        let mut adapter = mqtt_adapter;
        adapter.clear_known_devices().await?;
        info!("known-devices topic cleared, exiting");
        return Ok(());
    }

    let (publish_tx, publish_rx) = mpsc::channel::<PublishEvent>(256);
    let (command_tx, mut command_rx) = mpsc::channel(32);
    // Frames handed to the processor, after any dumpfile replay/tee step.
    let (frame_tx, mut frame_rx) = mpsc::channel::<Bytes>(64);

    let mqtt_task = tokio::spawn(mqtt::run(mqtt_adapter, eventloop, publish_rx, command_tx));

    let writer = if cli.dryrun {
        let dumpfile = cli
            .dumpfile
            .clone()
            .expect("clap enforces --dumpfile with --dryrun");
        tokio::spawn(replay_dumpfile(dumpfile, frame_tx));
        dry_run_writer()
    } else {
        // Real traffic lands on an internal channel first, so an optional
        // dumpfile tee can observe every frame before the processor does.
        let (raw_tx, raw_rx) = mpsc::channel::<Bytes>(64);
        let writer = spawn_transport(&config, raw_tx).await?;
        tokio::spawn(forward_with_optional_tee(
            raw_rx,
            frame_tx,
            cli.dumpfile.clone(),
        ));
        writer
    };

    let producer = Producer::new(
        repository.clone(),
        writer,
        config.poll_source_class,
        Arc::new(config.logging.clone()),
    );
    let poller_handles = poller::spawn_pollers(producer.clone(), &config.polling, &config.logging);

    let producer_for_commands = producer.clone();
    let command_task = tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            if let Err(err) = producer_for_commands
                .write(&command.point, &command.text_value, true)
                .await
            {
                warn!(point = %command.point, %err, "inbound command write failed");
            }
        }
    });

    let mut processor = MessageProcessor::new(
        repository.clone(),
        publish_tx,
        protocol_log,
        config.logging.clone(),
    );
    let invalid_packet_level = config.logging.invalid_packet_level();
    let processor_task = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            match crate::packet::NasaPacket::parse(&frame) {
                Ok(packet) => processor.process_packet(&packet).await,
                Err(err) => crate::log_at!(invalid_packet_level, %err, "dropping unparseable packet"),
            }
        }
    });

    tokio::select! {
        res = mqtt_task => {
            if let Err(err) = res {
                error!(%err, "mqtt task terminated");
            }
        }
        res = processor_task => {
            if let Err(err) = res {
                error!(%err, "processor task terminated");
            }
        }
        _ = command_task => {}
    }

    for handle in poller_handles {
        handle.abort();
    }
    Ok(())
}

/// A no-op writer used under `--dryrun`: frames are consumed but never sent.
fn dry_run_writer() -> TransportWriter {
    let (tx, mut rx) = mpsc::channel::<Bytes>(1);
    tokio::spawn(async move { while rx.recv().await.is_some() {} });
    TransportWriter::from_sender(tx)
}

/// One line per frame: a JSON array of the frame's decimal byte values.
/// Chosen over the original tool's two interchangeable textual formats
/// (JSON array / Python-repr hex list) as the single canonical shape here.
fn frame_to_dump_line(frame: &[u8]) -> String {
    serde_json::to_string(frame).unwrap_or_default()
}

fn dump_line_to_frame(line: &str) -> Option<Bytes> {
    let bytes: Vec<u8> = serde_json::from_str(line.trim()).ok()?;
    Some(Bytes::from(bytes))
}

/// Read previously captured frames from `path` and feed them to the
/// processor as if they'd just arrived off the bus.
async fn replay_dumpfile(path: PathBuf, out: mpsc::Sender<Bytes>) {
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(err) => {
            error!(%err, path = %path.display(), "failed to open dumpfile for replay");
            return;
        }
    };
    let mut lines = BufReader::new(file).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match dump_line_to_frame(&line) {
            Some(frame) => {
                if out.send(frame).await.is_err() {
                    return;
                }
            }
            None => warn!(line, "unparseable dumpfile line, skipping"),
        }
    }
    info!("dumpfile replay complete");
}

/// Forward raw frames from the transport to the processor, optionally
/// appending each one to a capture-sink dumpfile on the way through.
async fn forward_with_optional_tee(
    mut raw_rx: mpsc::Receiver<Bytes>,
    out: mpsc::Sender<Bytes>,
    dumpfile: Option<PathBuf>,
) {
    let mut sink = match dumpfile {
        Some(path) => match tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
        {
            Ok(file) => Some(file),
            Err(err) => {
                error!(%err, path = %path.display(), "failed to open dumpfile for capture");
                None
            }
        },
        None => None,
    };

    while let Some(frame) = raw_rx.recv().await {
        if let Some(file) = sink.as_mut() {
            let line = format!("{}\n", frame_to_dump_line(&frame));
            if let Err(err) = file.write_all(line.as_bytes()).await {
                warn!(%err, "failed to append frame to dumpfile");
            }
        }
        if out.send(frame).await.is_err() {
            return;
        }
    }
}

async fn spawn_transport(
    config: &Config,
    frame_tx: mpsc::Sender<Bytes>,
) -> Result<TransportWriter, EhsError> {
    match &config.transport {
        TransportConfig::Tcp(tcp) => {
            let stream = tokio::net::TcpStream::connect((tcp.ip.as_str(), tcp.port)).await?;
            let (read_half, write_half) = tokio::io::split(stream);
            Ok(spawn_reader_and_writer(read_half, write_half, frame_tx))
        }
        TransportConfig::Serial(serial) => {
            let port = tokio_serial::new(serial.device.to_string_lossy(), serial.baudrate)
                .data_bits(tokio_serial::DataBits::Eight)
                .parity(tokio_serial::Parity::Even)
                .stop_bits(tokio_serial::StopBits::One)
                .flow_control(tokio_serial::FlowControl::Hardware)
                .open_native_async()?;
            let (read_half, write_half) = tokio::io::split(port);
            Ok(spawn_reader_and_writer(read_half, write_half, frame_tx))
        }
    }
}

fn spawn_reader_and_writer<R, W>(
    read_half: R,
    write_half: W,
    frame_tx: mpsc::Sender<Bytes>,
) -> TransportWriter
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(err) = transport::run_reader(read_half, frame_tx).await {
            warn!(%err, "transport reader ended, reconnect backoff would apply here");
            tokio::time::sleep(RECONNECT_BACKOFF).await;
        }
    });
    let (writer, _handle) = transport::spawn_writer(write_half);
    writer
}

#[allow(dead_code)]
fn _assert_decoder_impl() {
    fn assert_impl<D: Decoder>() {}
    assert_impl::<NasaFrameCodec>();
}
