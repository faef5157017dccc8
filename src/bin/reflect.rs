use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;
use refract::Definitions;

fn main() -> Result<()> {
    env_logger::init();
    let path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: refract-reflect <shader.wgsl>")?;
    let source = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
    let defs = Definitions::from_source(&source).with_context(|| format!("reflecting {}", path.display()))?;

    let out = Definitions::cache_path(&path);
    if out.exists() {
        match Definitions::load(&out) {
            Ok(previous) => {
                let changed = previous.changed(&defs);
                if changed.is_empty() {
                    info!("{} is up to date", out.display());
                }
                for name in changed {
                    println!("changed: {name}");
                }
            }
            Err(e) => info!("ignoring unreadable {}: {e}", out.display()),
        }
    }
    defs.save(&out)?;
    println!(
        "{}: {} uniforms, {} storages, {} samplers, {} textures, {} bindings",
        out.display(),
        defs.uniforms.len(),
        defs.storages.len(),
        defs.samplers.len(),
        defs.textures.len(),
        defs.bind_group_length
    );
    Ok(())
}
