use refract::definitions::{Definitions, Layout};
use refract::reflect::{reflect, Access, ReflectError, ResourceClass, TypeDescriptor};
use refract::view::{BufferView, Value};

const BOIDS: &str = r#"
enable f16;

const BLOCK: u32 = 64u;
const HISTORY = BLOCK / 16u;
override speed_limit: f32 = 2.0;

alias Vel = vec2<f32>;

struct Params {
    delta: f32,
    rule_distances: vec3f,
    transform: mat3x3f,
    count: atomic<u32>,
}

struct Boid {
    pos: vec2f,
    vel: Vel,
    trail: array<vec2f, HISTORY>,
    @align(16) tint: vec3f,
}

struct Flock {
    alive: u32,
    boids: array<Boid>,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> flock_in: Flock;
@group(0) @binding(2) var<storage, read_write> flock_out: Flock;
@group(0) @binding(3) var shadow: sampler_comparison;
@group(0) @binding(4) var depth: texture_depth_2d;
@group(0) @binding(5) var out_image: texture_storage_2d<rgba8unorm, write>;

var<workgroup> tile: array<f32, BLOCK>;

/* a nested /* comment */ with { unbalanced braces */
@compute @workgroup_size(BLOCK)
fn simulate(@builtin(global_invocation_id) id: vec3u) {
    let index = id.x;
    if (index >= arrayLength(&flock_in.boids)) { return; }
    flock_out.boids[index] = flock_in.boids[index];
}
"#;

#[test]
fn boids_layout() {
    let reflection = reflect(BOIDS).unwrap();

    let params = reflection.struct_type("Params").unwrap();
    let TypeDescriptor::Struct { members, size, align, .. } = params else {
        panic!("Params is not a struct");
    };
    let offsets: Vec<_> = members.iter().map(|m| (m.name.as_str(), m.offset)).collect();
    assert_eq!(
        offsets,
        vec![("delta", 0), ("rule_distances", 16), ("transform", 32), ("count", 80)]
    );
    assert_eq!((*size, *align), (96, 16));

    let boid = reflection.struct_type("Boid").unwrap();
    let TypeDescriptor::Struct { members, size, .. } = boid else {
        panic!("Boid is not a struct");
    };
    let trail = &members[2];
    assert_eq!(trail.offset, 16);
    assert_eq!(trail.ty.wgsl_name(), "array<vec2<f32>, 4>");
    assert_eq!(trail.size, 32);
    assert_eq!(members[3].offset, 48);
    assert_eq!(*size, 64);

    let flock_out = reflection.resource("flock_out").unwrap();
    let ResourceClass::Storage(ty, access) = &flock_out.class else {
        panic!("flock_out is not a storage");
    };
    assert_eq!(*access, Access::ReadWrite);
    assert!(ty.is_runtime_sized());
    assert!(reflection.resource("tile").is_none());

    let simulate = &reflection.entry_points[0];
    assert_eq!(simulate.workgroup_size, Some([64, 1, 1]));
}

#[test]
fn boids_definitions() {
    let defs = Definitions::from_source(BOIDS).unwrap();
    assert_eq!(defs.bind_group_length, 6);
    assert_eq!(defs.storages["flock_in"].access, Some(Access::Read));
    assert!(defs.samplers[0].comparison);
    assert_eq!(defs.textures.len(), 2);
    assert_eq!(defs.entries.computes[0].workgroup_size, [64, 1, 1]);
    assert!(defs.entries.vertex.is_none());

    let names: Vec<_> = defs.bindings().iter().map(|b| b.name.to_string()).collect();
    assert_eq!(names, ["params", "flock_in", "flock_out", "shadow", "depth", "out_image"]);

    let Layout::Struct(members) = &defs.storages["flock_in"].layout else {
        panic!("flock_in is not a struct");
    };
    let Layout::Array(boids) = &members.get("boids").unwrap().layout else {
        panic!("boids is not an array");
    };
    assert_eq!((boids.count, boids.stride), (0, 64));
    assert_eq!(defs.storages["flock_in"].byte_size(10), 16 + 640);
}

#[test]
fn runtime_sized_view_over_reflected_storage() {
    let defs = Definitions::from_source(BOIDS).unwrap();
    let mut view = BufferView::new(&defs.storages["flock_out"], 3).unwrap();
    assert_eq!(view.len(), 16 + 3 * 64);

    let boid = Value::fields([
        ("pos", Value::Numbers(vec![1.0, 2.0])),
        ("vel", Value::Numbers(vec![0.5, -0.5])),
        ("tint", Value::Numbers(vec![0.25, 0.5, 0.75])),
    ]);
    view.set(&Value::fields([
        ("alive", Value::Number(2.0)),
        ("boids", Value::List(vec![boid.clone(), boid])),
    ]))
    .unwrap();

    let value = view.get();
    assert_eq!(value.field("alive"), Some(&Value::Number(2.0)));
    let Some(Value::List(boids)) = value.field("boids") else {
        panic!("boids did not read back as a list");
    };
    assert_eq!(boids.len(), 3);
    assert_eq!(boids[1].field("tint"), Some(&Value::Numbers(vec![0.25, 0.5, 0.75])));
    assert_eq!(boids[2].field("pos"), Some(&Value::Numbers(vec![0.0, 0.0])));
}

#[test]
fn errors_carry_positions() {
    let err = reflect("struct A {\n  x: f32,\n  y: vec5f,\n}").unwrap_err();
    assert!(matches!(err, ReflectError::UnknownType { .. }));
    assert_eq!(err.span().line, 3);

    let err = reflect("@group(0) var<uniform> u: f32;").unwrap_err();
    assert!(matches!(err, ReflectError::MissingBinding { .. }));

    let err = reflect("struct A { x: f32 ").unwrap_err();
    assert!(matches!(err, ReflectError::Parse(_)));
    assert!(err.to_string().contains("1:"));
}
