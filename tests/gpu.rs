//! End-to-end runs on a real adapter. Every test returns early when the
//! machine has none.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use refract::{
    ComputeSpec, Core, DriverConfig, DriverState, ErrorKind, ErrorSink, FrameDriver, PSpec, ShaderInstance,
    StorageSpec, SystemUniforms, Value,
};

const PING_PONG: &str = r#"
struct Sys {
    frame: u32,
}

@group(0) @binding(0) var<uniform> sys: Sys;
@group(0) @binding(1) var<storage, read_write> current: array<u32>;
@group(0) @binding(2) var<storage, read_write> next: array<u32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3u) {
    if (id.x >= 64u) {
        return;
    }
    next[id.x] = current[id.x] + id.x + sys.frame;
}
"#;

fn core() -> Option<Core> {
    match pollster::block_on(Core::headless(64, 64)) {
        Ok(core) => Some(core),
        Err(e) => {
            eprintln!("skipping: {e}");
            None
        }
    }
}

fn ping_pong_spec(source: &str) -> Result<PSpec, refract::Error> {
    let seed: Vec<f64> = (0..64).map(f64::from).collect();
    Ok(PSpec::from_source(source)?
        .with_storage(StorageSpec::new("current", 64).with_data(seed).readable())
        .with_storage(StorageSpec::new("next", 64))
        .with_compute(ComputeSpec::new("main", [1, 1, 1]))
        .with_bindings(vec![vec![0, 1, 2], vec![0, 2, 1]]))
}

fn collect_reads(instance: &mut ShaderInstance) -> Rc<RefCell<Vec<(String, Vec<f64>)>>> {
    let reads = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&reads);
    instance.add_read_listeners(move |name, view| {
        if let Value::Numbers(numbers) = view.get() {
            sink.borrow_mut().push((name.to_string(), numbers));
        }
    });
    reads
}

#[test]
fn ping_pong_reads_back() {
    let Some(core) = core() else { return };
    let sink = ErrorSink::new();
    let mut instance = ShaderInstance::build(&core, ping_pong_spec(PING_PONG).unwrap(), &sink).unwrap();
    assert_eq!(instance.groups(), 2);
    assert_eq!(instance.steps(), 1);
    assert!(!instance.has_render());
    let reads = collect_reads(&mut instance);

    for frame in 0..2 {
        let system = SystemUniforms {
            frame,
            ..Default::default()
        };
        instance.run(&core, frame, &system, None).unwrap();
        instance.wait_for_reads(&core).unwrap();
    }

    let reads = reads.borrow();
    assert_eq!(reads.len(), 2);
    let (name, first) = &reads[0];
    assert_eq!(name, "current");
    assert_eq!(first.len(), 64);
    assert_eq!(first[5], 5.0);
    // frame 0 wrote 2i into the other buffer, frame 1 wrote 3i + 1 back
    assert_eq!(reads[1].1[5], 16.0);
    assert_eq!(instance.view("current").unwrap().get(), Value::Numbers(reads[1].1.clone()));
    instance.destroy();
}

#[test]
fn build_reports_compilation_errors() {
    let Some(core) = core() else { return };
    let records = Rc::new(RefCell::new(Vec::new()));
    let sink = ErrorSink::new();
    let seen = Rc::clone(&records);
    sink.on_error(move |record| seen.borrow_mut().push(record.clone()));

    let broken = PING_PONG.replace("+ sys.frame", "+ sys.missing");
    let err = ShaderInstance::build(&core, ping_pong_spec(&broken).unwrap(), &sink).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Compilation);
    let records = records.borrow();
    assert!(records[0].fatal);
    assert!(records[0].details.as_deref().is_some_and(|d| d.starts_with("at 15:")));
}

#[test]
fn vertex_without_fragment_is_rejected() {
    let Some(core) = core() else { return };
    let spec = PSpec::from_source(
        "@vertex fn vs() -> @builtin(position) vec4f { return vec4f(0.0); }",
    )
    .unwrap();
    let err = ShaderInstance::build(&core, spec, &ErrorSink::new()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);
}

#[test]
fn driver_keeps_running_instance_on_bad_reload() {
    let Some(core) = core() else { return };
    let mut driver = FrameDriver::new(
        PING_PONG,
        |source: &str, _size| ping_pong_spec(source),
        ErrorSink::new(),
        DriverConfig::default(),
    );
    driver.start(&core).unwrap();
    assert!(driver.tick(&core, None).unwrap());
    assert_eq!(driver.frame(), 1);

    assert!(driver.set_source(&core, "@compute fn main() {}").is_err());
    assert!(driver.instance().is_some());
    assert_eq!(driver.source(), PING_PONG);
    assert!(driver.tick(&core, None).unwrap());

    assert_eq!(driver.toggle_play_pause(), DriverState::Paused);
    assert!(!driver.tick(&core, None).unwrap());
    driver.toggle_play_pause();

    driver.reset(&core).unwrap();
    assert_eq!(driver.frame(), 0);
    assert!(driver.tick(&core, None).unwrap());

    driver.stop();
    assert_eq!(driver.state(), DriverState::Destroyed);
    assert!(driver.instance().is_none());
    assert!(driver.start(&core).is_err());
}

#[test]
fn resize_rebuilds_for_the_settled_size() {
    let Some(core) = core() else { return };
    let sizes = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&sizes);
    let mut driver = FrameDriver::new(
        PING_PONG,
        move |source: &str, size| {
            seen.borrow_mut().push(size);
            ping_pong_spec(source)
        },
        ErrorSink::new(),
        DriverConfig::default().with_resize_debounce(Duration::ZERO),
    );
    driver.start(&core).unwrap();
    assert_eq!(driver.size(), (64, 64));

    driver.resize(0, 10);
    driver.resize(100, 40);
    driver.resize(128, 32);
    assert!(driver.tick(&core, None).unwrap());
    assert_eq!(driver.size(), (128, 32));
    assert_eq!(driver.frame(), 1);
    assert_eq!(*sizes.borrow(), vec![(64, 64), (128, 32)]);
    driver.stop();
}
