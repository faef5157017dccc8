use std::fs;
use std::path::PathBuf;

use anyhow::Result;
use log::debug;
use refract::{
    ComputeSpec, DriverConfig, ErrorSink, FrameDriver, Geometry, PSpec, ShaderApp, ShaderHotReload, StorageSpec,
    Topology, Value,
};

const GRID: u32 = 64;

fn main() -> Result<()> {
    match std::env::var_os("REFRACT_LOG_DIR") {
        Some(dir) => refract::file_log::init_tracing(dir)?,
        None => env_logger::init(),
    }
    // an optional path enables hot reload of that file
    let path = std::env::args_os().nth(1).map(PathBuf::from);
    let source = match &path {
        Some(path) => fs::read_to_string(path)?,
        None => include_str!("../../shaders/life.wgsl").to_string(),
    };

    let (mut app, event_loop) = ShaderApp::new("Game of Life", 768, 768)?;
    if let Some(path) = &path {
        app = app.with_hot_reload(ShaderHotReload::new(path)?);
    }
    app.run(event_loop, move |core| {
        let format = core.format();
        let sink = ErrorSink::new();
        sink.on_error(|record| {
            if let Some(suggestion) = &record.suggestion {
                eprintln!("hint: {suggestion}");
            }
        });
        let mut driver = FrameDriver::new(
            source,
            // the board is fixed by GRID, so the canvas size does not matter
            move |code: &str, _size| life_spec(code, format),
            sink,
            DriverConfig::default(),
        );
        driver.add_read_listener(|name, view| {
            if let Value::Numbers(cells) = view.get() {
                let alive = cells.iter().filter(|c| **c > 0.5).count();
                debug!("{name}: {alive} cells alive");
            }
        });
        Ok(driver)
    })?;
    Ok(())
}

fn life_spec(code: &str, format: wgpu::TextureFormat) -> Result<PSpec, refract::Error> {
    // xorshift, roughly a quarter of the board starts alive
    let mut seed = 0x2545_f491u32;
    let cells: Vec<f64> = (0..GRID * GRID)
        .map(|_| {
            seed ^= seed << 13;
            seed ^= seed >> 17;
            seed ^= seed << 5;
            if seed % 4 == 0 {
                1.0
            } else {
                0.0
            }
        })
        .collect();

    Ok(PSpec::from_source(code)?
        .with_label("life")
        .with_storage(StorageSpec::new("current", GRID * GRID).with_data(cells).readable())
        .with_storage(StorageSpec::new("next", GRID * GRID))
        .with_compute(ComputeSpec::new("step", [GRID / 8, GRID / 8, 1]))
        .with_bindings(vec![vec![0, 1, 2], vec![0, 2, 1]])
        .with_geometry(Geometry::new(4, Topology::TriangleStrip).with_instances(GRID * GRID))
        .with_clear_color([0.02, 0.02, 0.03, 1.0])
        .with_target_format(format))
}
