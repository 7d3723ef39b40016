//! End-to-end runs over real sessions backed by scripted mock transports.
//!
//! Two instruments are connected through an `InstrumentRegistry`: a source whose
//! quantities are swept, and a meter whose quantities are read back.

use daq_core::mock::{MockHandle, MockTransport};
use daq_core::{DataType, ErrorKind, QuantityId, QuantityIo, Value};
use daq_driver_generic::{DriverCatalogue, DriverConfig, InstrumentRegistry};
use daq_experiment::{
    EngineState, NullObserver, Plan, PlanDocument, RunEngine, RunObserver, StopSignal, SweepSpec,
};
use daq_storage::{MemorySink, ResultSink, TextResultSink};
use std::sync::Arc;

// =============================================================================
// Fixtures
// =============================================================================

const SOURCE_DRIVER: &str = "\
[General settings]
name: Bench Source

[VISA settings]
timeout: 1

[Freq]
datatype: DOUBLE
low_lim: 0
set_cmd: FREQ
get_cmd: FREQ?

[X]
datatype: DOUBLE
set_cmd: XPOS
get_cmd: XPOS?

[Z]
datatype: DOUBLE
set_cmd: ZPOS
get_cmd: ZPOS?

[Mode]
datatype: COMBO
def_value: Normal
combo_def_1: Normal
combo_def_2: Expert
cmd_def_1: NORM
cmd_def_2: EXP
set_cmd: MODE
get_cmd: MODE?

[Gain]
datatype: DOUBLE
state_quant: Mode
state_value_1: Expert
set_cmd: GAIN
get_cmd: GAIN?
";

const METER_DRIVER: &str = "\
[General settings]
name: Bench Meter

[VISA settings]
timeout: 1

[Y]
datatype: DOUBLE
set_cmd: YPOS
get_cmd: YPOS?

[Power]
datatype: DOUBLE
permission: READ
get_cmd: POW?
";

struct Bench {
    registry: InstrumentRegistry,
    source: MockHandle,
    meter: MockHandle,
}

async fn bench() -> Bench {
    let catalogue = Arc::new(DriverCatalogue::new());
    catalogue.add_driver(DriverConfig::parse(SOURCE_DRIVER).unwrap());
    catalogue.add_driver(DriverConfig::parse(METER_DRIVER).unwrap());
    catalogue.register_instrument("A", "Bench Source").unwrap();
    catalogue.register_instrument("B", "Bench Meter").unwrap();

    let source = MockTransport::new("A").with_echo();
    let meter = MockTransport::new("B").with_echo().with_stored("POW", "-12.5");
    let (source_handle, meter_handle) = (source.handle(), meter.handle());

    let mut registry = InstrumentRegistry::new();
    registry
        .connect("A", catalogue.clone(), Box::new(source))
        .await
        .unwrap();
    registry
        .connect("B", catalogue, Box::new(meter))
        .await
        .unwrap();

    Bench {
        registry,
        source: source_handle,
        meter: meter_handle,
    }
}

fn id(instrument: &str, quantity: &str) -> QuantityId {
    QuantityId::new(instrument, quantity)
}

fn doubles(sink: &MemorySink, column: &str) -> Vec<f64> {
    sink.records()
        .iter()
        .filter_map(|r| r.get(column).and_then(Value::as_f64))
        .collect()
}

#[derive(Default)]
struct Collector {
    steps: Vec<usize>,
    stop: Option<StopSignal>,
}

impl RunObserver for Collector {
    fn emit_record(&mut self, record: &daq_core::ResultRecord) {
        self.steps.push(record.step);
    }

    fn should_stop(&mut self) -> bool {
        self.stop.as_ref().is_some_and(StopSignal::is_triggered)
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_single_level_double_sweep() {
    let mut bench = bench().await;
    let plan = Plan::builder()
        .level(vec![(
            id("A", "Freq"),
            SweepSpec::range(DataType::Double, 1.0, 5.0, 5),
        )])
        .output(id("B", "Power"))
        .build(&bench.registry)
        .unwrap();

    let mut sink = MemorySink::new();
    let mut observer = Collector::default();
    let summary = RunEngine::new(plan)
        .run(&mut bench.registry, &mut observer, &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.state, EngineState::Completed);
    assert_eq!(summary.records, 5);
    assert_eq!(observer.steps, vec![0, 1, 2, 3, 4]);
    assert_eq!(
        doubles(&sink, "Input - A - Freq"),
        vec![1.0, 2.0, 3.0, 4.0, 5.0]
    );
    assert_eq!(doubles(&sink, "Output - B - Power"), vec![-12.5; 5]);
    assert_eq!(
        bench.source.writes(),
        vec!["FREQ 1", "FREQ 2", "FREQ 3", "FREQ 4", "FREQ 5"]
    );
    assert_eq!(bench.meter.reads(), 5);

    bench.registry.close_all().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_two_level_cross_product() {
    let mut bench = bench().await;
    let plan = Plan::builder()
        .level(vec![(
            id("A", "X"),
            SweepSpec::range(DataType::Double, 0.0, 2.0, 3),
        )])
        .level(vec![(
            id("B", "Y"),
            SweepSpec::range(DataType::Double, 10.0, 20.0, 2),
        )])
        .output(id("B", "Power"))
        .build(&bench.registry)
        .unwrap();

    let mut sink = MemorySink::new();
    let summary = RunEngine::new(plan)
        .run(&mut bench.registry, &mut NullObserver, &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.records, 6);
    assert_eq!(
        doubles(&sink, "Input - A - X"),
        vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0]
    );
    assert_eq!(
        doubles(&sink, "Input - B - Y"),
        vec![10.0, 20.0, 10.0, 20.0, 10.0, 20.0]
    );
    let steps: Vec<usize> = sink.records().iter().map(|r| r.step).collect();
    assert_eq!(steps, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test(start_paused = true)]
async fn test_co_leveled_quantities_are_zipped() {
    let mut bench = bench().await;
    let plan = Plan::builder()
        .level(vec![
            (id("A", "X"), SweepSpec::range(DataType::Double, 1.0, 3.0, 3)),
            (id("A", "Z"), SweepSpec::range(DataType::Double, -1.0, -3.0, 3)),
        ])
        .output(id("B", "Power"))
        .build(&bench.registry)
        .unwrap();

    let mut sink = MemorySink::new();
    let summary = RunEngine::new(plan)
        .run(&mut bench.registry, &mut NullObserver, &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.records, 3);
    assert_eq!(doubles(&sink, "Input - A - X"), vec![1.0, 2.0, 3.0]);
    assert_eq!(doubles(&sink, "Input - A - Z"), vec![-1.0, -2.0, -3.0]);
    assert_eq!(
        bench.source.writes(),
        vec!["XPOS 1", "ZPOS -1", "XPOS 2", "ZPOS -2", "XPOS 3", "ZPOS -3"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_out_of_range_input_fails_before_any_write() {
    let mut bench = bench().await;

    let err = bench
        .registry
        .set(&id("A", "Freq"), Value::Double(-1.0))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Value);
    assert!(bench.source.writes().is_empty());

    let plan = Plan::builder()
        .level(vec![(
            id("A", "Freq"),
            SweepSpec::range(DataType::Double, -1.0, 1.0, 3),
        )])
        .output(id("B", "Power"))
        .build(&bench.registry)
        .unwrap();
    let mut engine = RunEngine::new(plan);
    let mut sink = MemorySink::new();
    let err = engine
        .run(&mut bench.registry, &mut NullObserver, &mut sink)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Execution);
    assert_eq!(engine.state(), EngineState::Failed);
    assert!(sink.records().is_empty());
    assert!(bench.source.writes().is_empty());
    assert_eq!(bench.meter.reads(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_visibility_follows_combo_sweep() {
    let mut bench = bench().await;
    let mode = id("A", "Mode");

    bench
        .registry
        .set(&mode, Value::from("Normal"))
        .await
        .unwrap();
    let source = bench.registry.session("A").unwrap();
    assert!(!source.is_visible("Gain").unwrap());

    bench
        .registry
        .set(&mode, Value::from("Expert"))
        .await
        .unwrap();
    let source = bench.registry.session("A").unwrap();
    assert!(source.is_visible("Gain").unwrap());
    assert_eq!(
        bench.source.writes(),
        vec!["MODE NORM", "MODE EXP"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_stop_requested_mid_read_completes_step() {
    let mut bench = bench().await;
    let plan = Plan::builder()
        .level(vec![(
            id("A", "Freq"),
            SweepSpec::range(DataType::Double, 1.0, 100.0, 100),
        )])
        .output(id("B", "Power"))
        .build(&bench.registry)
        .unwrap();

    // One meter read per step: read 38 belongs to step 37.
    let stop = StopSignal::new();
    let trigger = stop.clone();
    bench.meter.on_read(move |count| {
        if count == 38 {
            trigger.trigger();
        }
    });

    let mut engine = RunEngine::new(plan);
    let mut sink = MemorySink::new();
    let mut observer = Collector {
        stop: Some(stop),
        ..Default::default()
    };
    let summary = engine
        .run(&mut bench.registry, &mut observer, &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.state, EngineState::Aborted);
    assert_eq!(engine.state(), EngineState::Aborted);
    assert_eq!(summary.records, 38);
    assert_eq!(observer.steps.last(), Some(&37));
    assert!(sink.records()[37].contains("Output - B - Power"));
    assert_eq!(bench.meter.reads(), 38);
    assert_eq!(bench.source.writes().len(), 38);
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_meter_fails_run() {
    let mut bench = bench().await;
    let plan = Plan::builder()
        .level(vec![(
            id("A", "Freq"),
            SweepSpec::range(DataType::Double, 1.0, 4.0, 4),
        )])
        .output(id("B", "Power"))
        .build(&bench.registry)
        .unwrap();

    // Link drops while step 0 waits for its reading.
    bench.meter.fail_next_read(std::io::ErrorKind::BrokenPipe);

    let mut engine = RunEngine::new(plan);
    let mut sink = MemorySink::new();
    let err = engine
        .run(&mut bench.registry, &mut NullObserver, &mut sink)
        .await
        .unwrap_err();

    assert!(err.is_disconnect());
    assert_eq!(engine.state(), EngineState::Failed);
    assert_eq!(engine.records(), 0);
    assert_eq!(bench.source.writes(), vec!["FREQ 1"]);
}

#[tokio::test(start_paused = true)]
async fn test_plan_file_run_into_text_sink() {
    let mut bench = bench().await;
    let text = r#"
        comment = "power vs. frequency"
        settle_delay = 0.2
        outputs = [{ instrument = "B", quantity = "Power" }]

        [[levels]]
        inputs = [{ instrument = "A", quantity = "Freq", start = 1, stop = 2, step = 0.5 }]
    "#;
    let plan = PlanDocument::from_toml_str(text)
        .unwrap()
        .build(&bench.registry)
        .unwrap();

    let dir = tempfile::tempdir().unwrap();
    let mut sink = TextResultSink::builder()
        .output_dir(dir.path())
        .base_name("bench")
        .build()
        .unwrap();
    let summary = RunEngine::new(plan)
        .run(&mut bench.registry, &mut NullObserver, &mut sink)
        .await
        .unwrap();

    assert_eq!(summary.records, 3);
    let path = summary.path.unwrap();
    assert_eq!(Some(path.as_path()), sink.path());
    let written = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = written.lines().collect();
    assert_eq!(
        lines,
        vec![
            "# power vs. frequency",
            "step\tstep2\tInput - A - Freq\tOutput - B - Power",
            "0\t\t1\t-12.5",
            "1\t\t1.5\t-12.5",
            "2\t\t2\t-12.5",
        ]
    );
}
