//! Shader module creation with diagnostics.

use log::debug;

use crate::error::{Error, ErrorKind, ErrorSink};
use crate::Core;

/// Runs the WGSL front end and validator over `source`. Errors carry the
/// 1-based line and column of the first diagnostic.
pub fn check_source(source: &str) -> Result<(), Error> {
    if source.trim().is_empty() {
        return Err(Error::Compilation {
            message: "shader source is empty".into(),
            line: 1,
            column: 1,
        });
    }
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        let (line, column) = e
            .location(source)
            .map_or((1, 1), |l| (l.line_number, l.line_position));
        Error::Compilation {
            message: e.message().to_string(),
            line,
            column,
        }
    })?;
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| {
        let (line, column) = e
            .location(source)
            .map_or((1, 1), |l| (l.line_number, l.line_position));
        Error::Compilation {
            message: e.as_inner().to_string(),
            line,
            column,
        }
    })?;
    debug!(
        "shader validated: {} entry points, {} globals",
        module.entry_points.len(),
        module.global_variables.len()
    );
    Ok(())
}

/// Checks `source`, creates the device module and reports compilation
/// warnings through `sink`.
pub fn create_module(core: &Core, source: &str, label: &str, sink: &ErrorSink) -> Result<wgpu::ShaderModule, Error> {
    check_source(source)?;
    let module = core.device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    let info = pollster::block_on(module.get_compilation_info());
    for message in info.messages {
        let at = message
            .location
            .map(|l| format!(" at {}:{}", l.line_number, l.line_position))
            .unwrap_or_default();
        match message.message_type {
            wgpu::CompilationMessageType::Error => {
                let (line, column) = message
                    .location
                    .map_or((1, 1), |l| (l.line_number, l.line_position));
                return Err(Error::Compilation {
                    message: message.message,
                    line,
                    column,
                });
            }
            wgpu::CompilationMessageType::Warning => {
                sink.warn(ErrorKind::Compilation, format!("{}{at}", message.message))
            }
            wgpu::CompilationMessageType::Info => debug!("{}{at}", message.message),
        }
    }
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_line_and_column() {
        let err = check_source("fn main() {\n  let x: f32 = ;\n}").unwrap_err();
        match err {
            Error::Compilation { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_source_is_fatal() {
        assert!(matches!(
            check_source("  \n"),
            Err(Error::Compilation { .. })
        ));
    }

    #[test]
    fn valid_source_passes() {
        check_source("@compute @workgroup_size(1) fn main() {}").unwrap();
    }
}
