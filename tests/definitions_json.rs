use refract::definitions::{Definitions, Layout};
use refract::view::{BufferView, Value};

/// Definitions as an external tool would hand them over.
const EXTERNAL: &str = r#"{
  "uniforms": {
    "sys": {
      "size": 16,
      "group": 0,
      "binding": 0,
      "struct": {
        "time": { "size": 4, "offset": 0, "primitive": { "name": "f32" } },
        "frame": { "size": 4, "offset": 4, "primitive": { "name": "u32" } },
        "mouse": { "size": 8, "offset": 8, "template": { "name": "vec2", "format": "f32" } }
      }
    }
  },
  "storages": {
    "points": {
      "size": 0,
      "group": 0,
      "binding": 1,
      "access": "read_write",
      "array": {
        "element": { "size": 12, "template": { "name": "vec3", "format": "f32" } },
        "count": 0,
        "stride": 16
      }
    }
  },
  "samplers": [{ "name": "samp", "group": 0, "binding": 2 }],
  "textures": [],
  "entries": {
    "computes": [{ "name": "main", "workgroupSize": [64, 1, 1] }]
  },
  "bindGroupLength": 3
}"#;

#[test]
fn reads_external_definitions() {
    let defs = Definitions::from_json(EXTERNAL).unwrap();
    assert_eq!(defs.bind_group_length, 3);
    assert!(!defs.samplers[0].comparison);
    assert_eq!(defs.entries.computes[0].workgroup_size, [64, 1, 1]);

    let Layout::Struct(members) = &defs.uniforms["sys"].layout else {
        panic!("sys is not a struct");
    };
    let order: Vec<_> = members.iter().map(|(name, _)| name).collect();
    assert_eq!(order, ["time", "frame", "mouse"]);

    let mut view = BufferView::new(&defs.uniforms["sys"], 1).unwrap();
    view.set(&Value::fields([
        ("frame", Value::Number(9.0)),
        ("mouse", Value::Numbers(vec![3.0, 4.0])),
    ]))
    .unwrap();
    assert_eq!(&view.bytes()[4..8], &9u32.to_le_bytes());
    assert_eq!(&view.bytes()[12..16], &4.0f32.to_le_bytes());

    let points = BufferView::new(&defs.storages["points"], 7).unwrap();
    assert_eq!(points.len(), 7 * 16);
}

#[test]
fn matches_reflected_source() {
    let reflected = Definitions::from_source(
        "struct Sys { time: f32, frame: u32, mouse: vec2f }\n\
         @group(0) @binding(0) var<uniform> sys: Sys;\n\
         @group(0) @binding(1) var<storage, read_write> points: array<vec3f>;\n\
         @group(0) @binding(2) var samp: sampler;\n\
         @compute @workgroup_size(64) fn main() {}",
    )
    .unwrap();
    let external = Definitions::from_json(EXTERNAL).unwrap();
    assert!(reflected.changed(&external).is_empty());
    assert_eq!(reflected.entries, external.entries);

    let json = reflected.to_json().unwrap();
    let sys = json.find("\"time\"").unwrap();
    let mouse = json.find("\"mouse\"").unwrap();
    assert!(sys < mouse, "member order lost in {json}");
}

#[test]
fn save_and_load_next_to_shader() {
    let dir = std::env::temp_dir().join(format!("refract-defs-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let shader = dir.join("life.wgsl");
    let cache = Definitions::cache_path(&shader);
    assert_eq!(cache.file_name().unwrap(), "life.defs.json");

    let defs = Definitions::from_json(EXTERNAL).unwrap();
    defs.save(&cache).unwrap();
    assert_eq!(Definitions::load(&cache).unwrap(), defs);
    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn rejects_descriptor_without_layout() {
    let broken = r#"{ "uniforms": { "u": { "size": 4 } }, "bindGroupLength": 1 }"#;
    assert!(Definitions::from_json(broken).is_err());
}
