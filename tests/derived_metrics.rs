use ehs_sentinel::config::LoggingConfig;
use ehs_sentinel::constants::PointType;
use ehs_sentinel::processor::{MessageProcessor, ProtocolLog};
use ehs_sentinel::repository::{PointDef, Repository};
use ehs_sentinel::value::Value;
use std::sync::Arc;

fn point(name: &str, address: u16, arithmetic: &str) -> PointDef {
    PointDef {
        name: name.to_string(),
        address,
        point_type: PointType::Var,
        signed: true,
        unit: None,
        arithmetic: arithmetic.to_string(),
        reverse_arithmetic: String::new(),
        enum_map: None,
        hass_opts: None,
    }
}

fn repository() -> Arc<Repository> {
    let mut repo = Repository::default();
    repo.insert_for_test(0x1001, point("outdoor_return_temp", 0x1001, "value/10"));
    repo.insert_for_test(0x1002, point("outdoor_supply_temp", 0x1002, "value/10"));
    repo.insert_for_test(0x1003, point("flow_sensor_calc", 0x1003, "value/10"));
    repo.insert_for_test(0x1004, point("total_wattmeter", 0x1004, "value/100"));
    Arc::new(repo)
}

#[tokio::test]
async fn s6_heat_output_and_cop_chain() {
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let mut processor = MessageProcessor::new(
        repository(),
        tx,
        ProtocolLog::disabled(),
        LoggingConfig::default(),
    );

    for (name, value) in [
        ("outdoor_return_temp", 30.0),
        ("outdoor_supply_temp", 35.0),
        ("flow_sensor_calc", 18.0),
        ("total_wattmeter", 1.5),
    ] {
        processor.ingest_value(name, Value::Numeric(value)).await;
    }

    // Also exercise the documented S6 order directly: wattmeter already
    // known, then temps/flow arrive and should retrigger COP too.
    let (tx2, mut rx2) = tokio::sync::mpsc::channel(64);
    let mut processor2 = MessageProcessor::new(
        repository(),
        tx2,
        ProtocolLog::disabled(),
        LoggingConfig::default(),
    );
    processor2
        .ingest_value("total_wattmeter", Value::Numeric(1.5))
        .await;
    for (name, value) in [
        ("outdoor_return_temp", 30.0),
        ("outdoor_supply_temp", 35.0),
        ("flow_sensor_calc", 18.0),
    ] {
        processor2.ingest_value(name, Value::Numeric(value)).await;
    }
    let mut cop_after_wattmeter_known = None;
    while let Ok(event) = rx2.try_recv() {
        if event.point == "COP" {
            cop_after_wattmeter_known = event.value.as_f64();
        }
    }
    assert!((cop_after_wattmeter_known.unwrap() - 4.190).abs() < 1e-6);

    let mut heat_output = None;
    let mut cop = None;
    while let Ok(event) = rx.try_recv() {
        match event.point.as_str() {
            "HEAT_OUTPUT" => heat_output = event.value.as_f64(),
            "COP" => cop = event.value.as_f64(),
            _ => {}
        }
    }

    assert!((heat_output.unwrap() - 6285.0).abs() < 1e-6);
    assert!((cop.unwrap() - 4.190).abs() < 1e-6);
}
