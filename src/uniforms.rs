use log::debug;

use crate::mouse::MouseState;
use crate::view::{BufferView, Value};

/// Values the frame driver provides to every shader. They are matched to
/// uniform fields (or whole uniform variables) by name.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SystemUniforms {
    pub frame: u64,
    /// Seconds since `start()`.
    pub time: f32,
    /// Seconds since the previous frame.
    pub delta: f32,
    pub mouse: MouseState,
    pub resolution: [f32; 2],
}

impl SystemUniforms {
    /// The value for a well-known name, if `name` is one.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        Some(match name {
            "frame" => Value::Number(self.frame as f64),
            "time" => Value::from(self.time),
            "delta" | "dt" => Value::from(self.delta),
            "mouse" | "pointer" => Value::from(self.mouse.position),
            "click" => Value::from(self.mouse.click_position),
            "wheel" => Value::from(self.mouse.wheel),
            "buttons" => Value::from(self.mouse.buttons),
            "resolution" => Value::from(self.resolution),
            _ => return None,
        })
    }

    /// Writes every matching field of `view`, which mirrors the uniform
    /// variable `name`. Fields that share a system name but are not plain
    /// numbers are left alone. Returns whether the view now needs uploading.
    pub fn apply(&self, name: &str, view: &mut BufferView) -> Result<bool, crate::view::ViewError> {
        let fields = view.field_names();
        if fields.is_empty() {
            return match self.lookup(name) {
                Some(value) if view.is_numeric(None) => {
                    view.set(&value)?;
                    Ok(view.is_dirty())
                }
                Some(_) => {
                    debug!("uniform `{name}` is not numeric, system value skipped");
                    Ok(false)
                }
                None => Ok(false),
            };
        }
        let mut matched = Vec::new();
        for field in fields {
            let Some(value) = self.lookup(field) else {
                continue;
            };
            if view.is_numeric(Some(field)) {
                matched.push((field.to_string(), value));
            } else {
                debug!("`{name}.{field}` is not numeric, system value skipped");
            }
        }
        if matched.is_empty() {
            return Ok(false);
        }
        view.set(&Value::fields(matched))?;
        Ok(view.is_dirty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::Definitions;

    #[test]
    fn fills_known_fields_only() {
        let defs = Definitions::from_source(
            "struct Sys { frame: u32, resolution: vec2f, gain: f32 }\n\
             @group(0) @binding(0) var<uniform> sys: Sys;",
        )
        .unwrap();
        let mut view = BufferView::new(&defs.uniforms["sys"], 1).unwrap();
        view.set(&Value::fields([("gain", Value::Number(0.5))])).unwrap();

        let system = SystemUniforms {
            frame: 7,
            resolution: [640.0, 480.0],
            ..Default::default()
        };
        assert!(system.apply("sys", &mut view).unwrap());
        assert_eq!(
            view.get(),
            Value::fields([
                ("frame", Value::Number(7.0)),
                ("resolution", Value::Numbers(vec![640.0, 480.0])),
                ("gain", Value::Number(0.5)),
            ])
        );
    }

    #[test]
    fn whole_variable_by_name() {
        let defs = Definitions::from_source("@group(0) @binding(0) var<uniform> time: f32;").unwrap();
        let mut view = BufferView::new(&defs.uniforms["time"], 1).unwrap();
        let system = SystemUniforms {
            time: 2.0,
            ..Default::default()
        };
        assert!(system.apply("time", &mut view).unwrap());
        assert_eq!(view.get(), Value::Number(2.0));
        assert!(!system.apply("other", &mut view).unwrap());
    }

    #[test]
    fn skips_fields_that_are_not_numbers() {
        let defs = Definitions::from_source(
            "struct Mouse { pos: vec2f, down: u32 }\n\
             struct Sys { frame: u32, mouse: Mouse }\n\
             @group(0) @binding(0) var<uniform> sys: Sys;",
        )
        .unwrap();
        let mut view = BufferView::new(&defs.uniforms["sys"], 1).unwrap();
        view.take_dirty();
        let system = SystemUniforms {
            frame: 3,
            ..Default::default()
        };
        assert!(system.apply("sys", &mut view).unwrap());
        assert_eq!(view.get().field("frame"), Some(&Value::Number(3.0)));
        assert_eq!(
            view.get().field("mouse"),
            Some(&Value::fields([
                ("pos", Value::Numbers(vec![0.0, 0.0])),
                ("down", Value::Number(0.0)),
            ]))
        );

        // same bytes again: nothing to upload
        view.take_dirty();
        assert!(!system.apply("sys", &mut view).unwrap());
        assert!(!view.is_dirty());
    }
}
