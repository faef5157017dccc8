use std::collections::HashMap;

use log::debug;

use super::layout::{self, StructLayouter};
use super::*;
use crate::wgsl::ast::{self, Attributed, BinaryOp, Expr, TemplateArg, TypeExpr};

/// Parses and reflects WGSL source. Fails as a whole on the first error;
/// there is no partial result.
pub fn reflect(source: &str) -> Result<Reflection, ReflectError> {
    let module = crate::wgsl::parse(source)?;
    let mut resolver = Resolver::new(&module);

    let mut structs = Vec::new();
    for decl in module.structs() {
        structs.push(resolver.named_struct(&decl.name, decl.span)?);
    }

    let mut resources = Vec::new();
    for var in module.vars() {
        if let Some(resource) = resolver.resource(var)? {
            resources.push(resource);
        }
    }

    let mut entry_points = Vec::new();
    for function in module.functions() {
        if let Some(entry) = resolver.entry_point(function)? {
            entry_points.push(entry);
        }
    }

    debug!(
        "reflected {} structs, {} resources, {} entry points",
        structs.len(),
        resources.len(),
        entry_points.len()
    );
    Ok(Reflection {
        structs,
        resources,
        entry_points,
    })
}

/// Predeclared type aliases, expanded to `(template, component)`.
fn predeclared(name: &str) -> Option<(&'static str, &'static str)> {
    let (base, component) = if let Some(base) = name.strip_suffix('f') {
        (base, "f32")
    } else if let Some(base) = name.strip_suffix('i') {
        (base, "i32")
    } else {
        (name.strip_suffix('u')?, "u32")
    };
    let template = match base {
        "vec2" => "vec2",
        "vec3" => "vec3",
        "vec4" => "vec4",
        "mat2x2" => "mat2x2",
        "mat2x3" => "mat2x3",
        "mat2x4" => "mat2x4",
        "mat3x2" => "mat3x2",
        "mat3x3" => "mat3x3",
        "mat3x4" => "mat3x4",
        "mat4x2" => "mat4x2",
        "mat4x3" => "mat4x3",
        "mat4x4" => "mat4x4",
        _ => return None,
    };
    // matrices only come in floating point
    if template.starts_with("mat") && component != "f32" {
        return None;
    }
    Some((template, component))
}

struct Resolver<'m> {
    structs: HashMap<&'m str, &'m ast::StructDecl>,
    aliases: HashMap<&'m str, &'m ast::AliasDecl>,
    consts: HashMap<&'m str, &'m ast::ConstDecl>,
    resolved: HashMap<String, TypeDescriptor>,
    /// Names currently being resolved, for cycle detection.
    in_progress: Vec<String>,
}

impl<'m> Resolver<'m> {
    fn new(module: &'m ast::Module) -> Self {
        Self {
            structs: module.structs().map(|s| (s.name.as_str(), s)).collect(),
            aliases: module.aliases().map(|a| (a.name.as_str(), a)).collect(),
            consts: module.consts().map(|c| (c.name.as_str(), c)).collect(),
            resolved: HashMap::new(),
            in_progress: Vec::new(),
        }
    }

    fn enter(&mut self, name: &str, span: Span) -> Result<(), ReflectError> {
        if self.in_progress.iter().any(|n| n == name) {
            return Err(ReflectError::Cycle {
                name: name.to_string(),
                span,
            });
        }
        self.in_progress.push(name.to_string());
        Ok(())
    }

    fn leave(&mut self) {
        self.in_progress.pop();
    }

    fn resolve(&mut self, ty: &TypeExpr) -> Result<TypeDescriptor, ReflectError> {
        let name = ty.name.as_str();
        if let Some(size) = layout::scalar_size(name) {
            self.no_template_args(ty)?;
            return Ok(TypeDescriptor::Primitive {
                name: name.to_string(),
                size,
            });
        }
        if let Some((template, component)) = predeclared(name) {
            self.no_template_args(ty)?;
            return self.template(template, component, ty.span);
        }
        if layout::template_shape(name).is_some() {
            let component = match ty.args.as_slice() {
                [TemplateArg::Type(inner)] => self.component(inner)?,
                _ => {
                    return Err(ReflectError::InvalidType {
                        message: format!("`{name}` takes exactly one component type"),
                        span: ty.span,
                    })
                }
            };
            return self.template(name, &component, ty.span);
        }
        if name == "array" {
            return self.array(ty);
        }
        if let Some(alias) = self.aliases.get(name).copied() {
            self.no_template_args(ty)?;
            self.enter(name, ty.span)?;
            let resolved = self.resolve(&alias.ty);
            self.leave();
            return resolved;
        }
        if self.structs.contains_key(name) {
            self.no_template_args(ty)?;
            return self.named_struct(name, ty.span);
        }
        Err(ReflectError::UnknownType {
            name: name.to_string(),
            span: ty.span,
        })
    }

    fn no_template_args(&self, ty: &TypeExpr) -> Result<(), ReflectError> {
        if ty.args.is_empty() {
            Ok(())
        } else {
            Err(ReflectError::InvalidType {
                message: format!("`{}` does not take template arguments", ty.name),
                span: ty.span,
            })
        }
    }

    /// Resolves the component type of a vector, matrix or atomic to a scalar
    /// name, following aliases.
    fn component(&mut self, ty: &TypeExpr) -> Result<String, ReflectError> {
        match self.resolve(ty)? {
            TypeDescriptor::Primitive { name, .. } if name != "bool" => Ok(name),
            other => Err(ReflectError::InvalidType {
                message: format!("`{}` is not a numeric scalar", other.wgsl_name()),
                span: ty.span,
            }),
        }
    }

    fn template(&self, name: &str, component: &str, span: Span) -> Result<TypeDescriptor, ReflectError> {
        let (columns, rows) = layout::template_shape(name).ok_or_else(|| ReflectError::UnknownType {
            name: name.to_string(),
            span,
        })?;
        if columns > 1 && component != "f32" {
            return Err(ReflectError::InvalidType {
                message: format!("matrix `{name}` must have `f32` components"),
                span,
            });
        }
        if name == "atomic" && component == "f32" {
            return Err(ReflectError::InvalidType {
                message: "atomic<f32> is not a valid type".to_string(),
                span,
            });
        }
        let scalar = layout::scalar_size(component).ok_or_else(|| ReflectError::UnknownType {
            name: component.to_string(),
            span,
        })?;
        let (size, align) = layout::template_layout(columns, rows, scalar);
        Ok(TypeDescriptor::Template {
            name: name.to_string(),
            format: component.to_string(),
            size,
            align,
        })
    }

    fn array(&mut self, ty: &TypeExpr) -> Result<TypeDescriptor, ReflectError> {
        let (element, count) = match ty.args.as_slice() {
            [TemplateArg::Type(element)] => (element, 0),
            [TemplateArg::Type(element), count] => {
                let count = self.count(count, ty.span)?;
                (element, count)
            }
            _ => {
                return Err(ReflectError::InvalidType {
                    message: "`array` takes an element type and an optional count".to_string(),
                    span: ty.span,
                })
            }
        };
        let element = self.resolve(element)?;
        if element.is_runtime_sized() {
            return Err(ReflectError::InvalidType {
                message: format!("array element `{}` is runtime-sized", element.wgsl_name()),
                span: ty.span,
            });
        }
        let overflow = || ReflectError::InvalidType {
            message: "array size overflows".to_string(),
            span: ty.span,
        };
        let stride = layout::array_stride(element.size(), element.align()).ok_or_else(overflow)?;
        let size = count.checked_mul(stride).ok_or_else(overflow)?;
        let align = element.align();
        Ok(TypeDescriptor::Array {
            element: Box::new(element),
            count,
            stride,
            size,
            align,
        })
    }

    fn count(&mut self, arg: &TemplateArg, span: Span) -> Result<u32, ReflectError> {
        let value = match arg {
            TemplateArg::Expr(expr) => self.eval(expr, span)?,
            TemplateArg::Type(t) if t.args.is_empty() => self.eval(&Expr::Ident(t.name.clone()), span)?,
            TemplateArg::Type(t) => {
                return Err(ReflectError::NotConstant {
                    expr: t.name.clone(),
                    span,
                })
            }
        };
        u32::try_from(value)
            .ok()
            .filter(|&v| v > 0)
            .ok_or_else(|| ReflectError::InvalidType {
                message: format!("array count must be a positive integer, got {value}"),
                span,
            })
    }

    fn named_struct(&mut self, name: &str, span: Span) -> Result<TypeDescriptor, ReflectError> {
        if let Some(done) = self.resolved.get(name) {
            return Ok(done.clone());
        }
        let decl = *self.structs.get(name).ok_or_else(|| ReflectError::UnknownType {
            name: name.to_string(),
            span,
        })?;
        self.enter(name, span)?;
        let result = self.struct_layout(decl);
        self.leave();
        let descriptor = result?;
        self.resolved.insert(name.to_string(), descriptor.clone());
        Ok(descriptor)
    }

    fn struct_layout(&mut self, decl: &ast::StructDecl) -> Result<TypeDescriptor, ReflectError> {
        let mut layouter = StructLayouter::new();
        let mut members = Vec::with_capacity(decl.members.len());
        let last = decl.members.len().saturating_sub(1);
        for (index, member) in decl.members.iter().enumerate() {
            let ty = self.resolve(&member.ty)?;
            if ty.is_runtime_sized() && index != last {
                return Err(ReflectError::InvalidType {
                    message: format!(
                        "runtime-sized member `{}` must be the last member of `{}`",
                        member.name, decl.name
                    ),
                    span: member.span,
                });
            }
            let align = match self.member_attribute(member, "align")? {
                Some(a) if a.is_power_of_two() => a,
                Some(a) => {
                    return Err(ReflectError::InvalidAttribute {
                        name: member.name.clone(),
                        attribute: "align".into(),
                        message: format!("{a} is not a power of two"),
                        span: member.span,
                    })
                }
                None => ty.align(),
            };
            let size = match self.member_attribute(member, "size")? {
                Some(s) if s >= ty.size() => s,
                Some(s) => {
                    return Err(ReflectError::InvalidAttribute {
                        name: member.name.clone(),
                        attribute: "size".into(),
                        message: format!("{s} is smaller than the type size {}", ty.size()),
                        span: member.span,
                    })
                }
                None => ty.size(),
            };
            let offset = layouter.place(size, align).ok_or_else(|| struct_overflow(decl))?;
            members.push(MemberDescriptor {
                name: member.name.clone(),
                ty,
                offset,
                size,
            });
        }
        let (size, align) = layouter.finish().ok_or_else(|| struct_overflow(decl))?;
        Ok(TypeDescriptor::Struct {
            name: decl.name.clone(),
            size,
            align,
            members,
        })
    }

    fn member_attribute(&mut self, member: &ast::StructMember, name: &str) -> Result<Option<u32>, ReflectError> {
        match member.attribute(name) {
            None => Ok(None),
            Some(attr) => self.attribute_value(&member.name, attr).map(Some),
        }
    }

    fn attribute_value(&mut self, owner: &str, attr: &ast::Attribute) -> Result<u32, ReflectError> {
        let expr = attr.args.first().ok_or_else(|| ReflectError::InvalidAttribute {
            name: owner.to_string(),
            attribute: attr.name.clone(),
            message: "missing argument".into(),
            span: attr.span,
        })?;
        let value = self.eval(expr, attr.span)?;
        u32::try_from(value).map_err(|_| ReflectError::InvalidAttribute {
            name: owner.to_string(),
            attribute: attr.name.clone(),
            message: format!("{value} is out of range"),
            span: attr.span,
        })
    }

    /// Evaluates an integer constant expression.
    fn eval(&mut self, expr: &Expr, span: Span) -> Result<i64, ReflectError> {
        let not_constant = |expr: &Expr| ReflectError::NotConstant {
            expr: describe(expr),
            span,
        };
        match expr {
            Expr::Int(v) => Ok(*v),
            Expr::Bool(b) => Ok(i64::from(*b)),
            Expr::Float(_) => Err(not_constant(expr)),
            Expr::Ident(name) => {
                let decl = self
                    .consts
                    .get(name.as_str())
                    .copied()
                    .ok_or_else(|| not_constant(expr))?;
                let init = decl.init.as_ref().ok_or_else(|| not_constant(expr))?;
                if decl.is_override {
                    debug!("using the default of override `{name}` as a constant");
                }
                self.enter(name, decl.span)?;
                let value = self.eval(init, decl.span);
                self.leave();
                value
            }
            Expr::Unary { op, operand } => {
                let v = self.eval(operand, span)?;
                match op {
                    '-' => Ok(-v),
                    '~' => Ok(!v),
                    '!' => Ok(i64::from(v == 0)),
                    _ => Err(not_constant(expr)),
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let (l, r) = (self.eval(lhs, span)?, self.eval(rhs, span)?);
                let overflow = || ReflectError::InvalidType {
                    message: format!("arithmetic error in `{}`", describe(expr)),
                    span,
                };
                match op {
                    BinaryOp::Add => l.checked_add(r).ok_or_else(overflow),
                    BinaryOp::Sub => l.checked_sub(r).ok_or_else(overflow),
                    BinaryOp::Mul => l.checked_mul(r).ok_or_else(overflow),
                    BinaryOp::Div => l.checked_div(r).ok_or_else(overflow),
                    BinaryOp::Rem => l.checked_rem(r).ok_or_else(overflow),
                    BinaryOp::Shl => u32::try_from(r)
                        .ok()
                        .and_then(|r| l.checked_shl(r))
                        .ok_or_else(overflow),
                    BinaryOp::Shr => u32::try_from(r)
                        .ok()
                        .and_then(|r| l.checked_shr(r))
                        .ok_or_else(overflow),
                    BinaryOp::And => Ok(l & r),
                    BinaryOp::Or => Ok(l | r),
                    BinaryOp::Xor => Ok(l ^ r),
                }
            }
            Expr::Call { callee, args } => match (callee.name.as_str(), args.as_slice()) {
                ("i32" | "u32" | "abs", [arg]) => {
                    let v = self.eval(arg, span)?;
                    Ok(if callee.name == "abs" { v.abs() } else { v })
                }
                ("min", [a, b]) => Ok(self.eval(a, span)?.min(self.eval(b, span)?)),
                ("max", [a, b]) => Ok(self.eval(a, span)?.max(self.eval(b, span)?)),
                _ => Err(not_constant(expr)),
            },
        }
    }

    fn resource(&mut self, var: &ast::GlobalVar) -> Result<Option<Resource>, ReflectError> {
        let class = match var.qualifiers.first().map(String::as_str) {
            Some("uniform") => {
                let ty = self.var_type(var)?;
                ResourceClass::Uniform(self.resolve(ty)?)
            }
            Some("storage") => {
                let access = match var.qualifiers.get(1).map(String::as_str) {
                    None | Some("read") => Access::Read,
                    Some("read_write" | "write") => Access::ReadWrite,
                    Some(other) => {
                        return Err(ReflectError::InvalidType {
                            message: format!("unknown access mode `{other}` on `{}`", var.name),
                            span: var.span,
                        })
                    }
                };
                let ty = self.var_type(var)?;
                ResourceClass::Storage(self.resolve(ty)?, access)
            }
            Some(_) => return Ok(None),
            None => match var.ty.as_ref() {
                Some(ty) if ty.name == "sampler" => ResourceClass::Sampler { comparison: false },
                Some(ty) if ty.name == "sampler_comparison" => {
                    ResourceClass::Sampler { comparison: true }
                }
                Some(ty) if ty.name.starts_with("texture_") => {
                    ResourceClass::Texture(self.texture_kind(ty)?)
                }
                _ => return Ok(None),
            },
        };
        let group = self.binding_attribute(var, "group")?;
        let binding = self.binding_attribute(var, "binding")?;
        Ok(Some(Resource {
            name: var.name.clone(),
            group,
            binding,
            class,
        }))
    }

    fn var_type<'a>(&self, var: &'a ast::GlobalVar) -> Result<&'a TypeExpr, ReflectError> {
        var.ty.as_ref().ok_or_else(|| ReflectError::InvalidType {
            message: format!("resource `{}` needs an explicit type", var.name),
            span: var.span,
        })
    }

    fn binding_attribute(&mut self, var: &ast::GlobalVar, attribute: &'static str) -> Result<u32, ReflectError> {
        let missing = || ReflectError::MissingBinding {
            name: var.name.clone(),
            attribute,
            span: var.span,
        };
        let attr = var.attribute(attribute).ok_or_else(missing)?;
        let expr = attr.args.first().ok_or_else(missing)?;
        let value = self.eval(expr, attr.span).map_err(|_| missing())?;
        u32::try_from(value).map_err(|_| missing())
    }

    fn texture_kind(&mut self, ty: &TypeExpr) -> Result<TextureKind, ReflectError> {
        let name = ty.name.as_str();
        let invalid = |message: String| ReflectError::InvalidType {
            message,
            span: ty.span,
        };
        let dimension_of = |suffix: &str| match suffix {
            "1d" => Some(TextureDimension::D1),
            "2d" => Some(TextureDimension::D2),
            "2d_array" => Some(TextureDimension::D2Array),
            "3d" => Some(TextureDimension::D3),
            "cube" => Some(TextureDimension::Cube),
            "cube_array" => Some(TextureDimension::CubeArray),
            _ => None,
        };

        if name == "texture_external" {
            return Ok(TextureKind {
                external: true,
                ..TextureKind::default()
            });
        }
        if let Some(suffix) = name.strip_prefix("texture_depth_") {
            let (dimension, multisampled) = match suffix {
                "multisampled_2d" => (TextureDimension::D2, true),
                other => (
                    dimension_of(other).ok_or_else(|| invalid(format!("unknown texture type `{name}`")))?,
                    false,
                ),
            };
            return Ok(TextureKind {
                dimension,
                sample: SampleKind::Depth,
                multisampled,
                ..TextureKind::default()
            });
        }
        if let Some(suffix) = name.strip_prefix("texture_storage_") {
            let dimension =
                dimension_of(suffix).ok_or_else(|| invalid(format!("unknown texture type `{name}`")))?;
            let (format, access) = match ty.args.as_slice() {
                [TemplateArg::Type(format), TemplateArg::Type(access)] => (format, access),
                _ => return Err(invalid(format!("`{name}` takes a texel format and an access mode"))),
            };
            let access = match access.name.as_str() {
                "read" => StorageTextureAccess::Read,
                "write" => StorageTextureAccess::Write,
                "read_write" => StorageTextureAccess::ReadWrite,
                other => return Err(invalid(format!("unknown access mode `{other}`"))),
            };
            let sample = match format.name.as_str() {
                f if f.ends_with("uint") => SampleKind::Uint,
                f if f.ends_with("sint") => SampleKind::Sint,
                _ => SampleKind::Float,
            };
            return Ok(TextureKind {
                dimension,
                sample,
                storage: Some(StorageTexture {
                    format: format.name.clone(),
                    access,
                }),
                ..TextureKind::default()
            });
        }
        let suffix = name
            .strip_prefix("texture_")
            .ok_or_else(|| invalid(format!("unknown texture type `{name}`")))?;
        let (dimension, multisampled) = match suffix {
            "multisampled_2d" => (TextureDimension::D2, true),
            other => (
                dimension_of(other).ok_or_else(|| invalid(format!("unknown texture type `{name}`")))?,
                false,
            ),
        };
        let sample = match ty.args.as_slice() {
            [TemplateArg::Type(component)] => match self.component(component)?.as_str() {
                "i32" => SampleKind::Sint,
                "u32" => SampleKind::Uint,
                _ => SampleKind::Float,
            },
            _ => return Err(invalid(format!("`{name}` takes a sampled component type"))),
        };
        Ok(TextureKind {
            dimension,
            sample,
            multisampled,
            ..TextureKind::default()
        })
    }

    fn entry_point(&mut self, function: &ast::Function) -> Result<Option<EntryPoint>, ReflectError> {
        let stage = if function.has_attribute("vertex") {
            Stage::Vertex
        } else if function.has_attribute("fragment") {
            Stage::Fragment
        } else if function.has_attribute("compute") {
            Stage::Compute
        } else {
            return Ok(None);
        };

        let workgroup_size = match (stage, function.attribute("workgroup_size")) {
            (Stage::Compute, Some(attr)) => {
                if attr.args.is_empty() || attr.args.len() > 3 {
                    return Err(ReflectError::InvalidAttribute {
                        name: function.name.clone(),
                        attribute: attr.name.clone(),
                        message: "expected one to three dimensions".into(),
                        span: attr.span,
                    });
                }
                let mut size = [1u32; 3];
                for (slot, expr) in size.iter_mut().zip(&attr.args) {
                    let value = self.eval(expr, attr.span)?;
                    *slot = u32::try_from(value).ok().filter(|&v| v > 0).ok_or_else(|| {
                        ReflectError::InvalidAttribute {
                            name: function.name.clone(),
                            attribute: attr.name.clone(),
                            message: format!("{value} is not a positive dimension"),
                            span: attr.span,
                        }
                    })?;
                }
                Some(size)
            }
            (Stage::Compute, None) => {
                return Err(ReflectError::InvalidAttribute {
                    name: function.name.clone(),
                    attribute: "workgroup_size".into(),
                    message: "compute entry points require it".into(),
                    span: function.span,
                })
            }
            _ => None,
        };

        let mut inputs = Vec::new();
        for param in &function.params {
            self.io_variables(&param.name, &param.attributes, &param.ty, &mut inputs)?;
        }
        let mut outputs = Vec::new();
        if let Some(ret) = &function.return_type {
            self.io_variables("return", &function.return_attributes, ret, &mut outputs)?;
        }

        Ok(Some(EntryPoint {
            name: function.name.clone(),
            stage,
            workgroup_size,
            inputs,
            outputs,
        }))
    }

    /// Collects shader-stage IO, flattening struct-typed parameters and return
    /// values into their members.
    fn io_variables(
        &mut self,
        name: &str,
        attributes: &[ast::Attribute],
        ty: &TypeExpr,
        out: &mut Vec<IoVariable>,
    ) -> Result<(), ReflectError> {
        let location = attributes.iter().find(|a| a.name == "location");
        let builtin = attributes.iter().find(|a| a.name == "builtin");
        if location.is_none() && builtin.is_none() {
            let decl = self.struct_decl_of(ty);
            if let Some(decl) = decl {
                for member in &decl.members {
                    self.io_variables(&member.name, &member.attributes, &member.ty, out)?;
                }
                return Ok(());
            }
        }
        let location = match location {
            Some(attr) => Some(self.attribute_value(name, attr)?),
            None => None,
        };
        let builtin = builtin.and_then(|attr| match attr.args.first() {
            Some(Expr::Ident(b)) => Some(b.clone()),
            _ => None,
        });
        out.push(IoVariable {
            name: name.to_string(),
            location,
            builtin,
            ty: self.resolve(ty)?,
        });
        Ok(())
    }

    fn struct_decl_of(&self, ty: &TypeExpr) -> Option<&'m ast::StructDecl> {
        let mut name = ty.name.as_str();
        // follow aliases, bounded to avoid looping on cyclic ones
        for _ in 0..=self.aliases.len() {
            if let Some(&decl) = self.structs.get(name) {
                return Some(decl);
            }
            let alias: &'m ast::AliasDecl = self.aliases.get(name).copied()?;
            name = alias.ty.name.as_str();
        }
        None
    }
}

fn struct_overflow(decl: &ast::StructDecl) -> ReflectError {
    ReflectError::InvalidType {
        message: format!("size of `{}` overflows", decl.name),
        span: decl.span,
    }
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Int(v) => v.to_string(),
        Expr::Float(v) => v.to_string(),
        Expr::Bool(b) => b.to_string(),
        Expr::Ident(name) => name.clone(),
        Expr::Unary { op, operand } => format!("{op}{}", describe(operand)),
        Expr::Binary { op, lhs, rhs } => {
            let symbol = match op {
                BinaryOp::Add => "+",
                BinaryOp::Sub => "-",
                BinaryOp::Mul => "*",
                BinaryOp::Div => "/",
                BinaryOp::Rem => "%",
                BinaryOp::Shl => "<<",
                BinaryOp::Shr => ">>",
                BinaryOp::And => "&",
                BinaryOp::Or => "|",
                BinaryOp::Xor => "^",
            };
            format!("{} {symbol} {}", describe(lhs), describe(rhs))
        }
        Expr::Call { callee, args } => {
            let args: Vec<String> = args.iter().map(describe).collect();
            format!("{}({})", callee.name, args.join(", "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn struct_members(r: &Reflection, name: &str) -> Vec<(String, u32, u32)> {
        match r.struct_type(name).unwrap() {
            TypeDescriptor::Struct { members, .. } => members
                .iter()
                .map(|m| (m.name.clone(), m.offset, m.size))
                .collect(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn vec3_then_scalar_packs_tightly() {
        let r = reflect("struct S { a: vec3<f32>, b: f32 }").unwrap();
        assert_eq!(
            struct_members(&r, "S"),
            vec![("a".into(), 0, 12), ("b".into(), 12, 4)]
        );
        assert_eq!(r.struct_type("S").unwrap().size(), 16);
        assert_eq!(r.struct_type("S").unwrap().align(), 16);
    }

    #[test]
    fn scalar_then_vec4_is_padded() {
        let r = reflect("struct S { a: f32, b: vec4<f32> }").unwrap();
        assert_eq!(struct_members(&r, "S")[1], ("b".into(), 16, 16));
        assert_eq!(r.struct_type("S").unwrap().size(), 32);
    }

    #[test]
    fn vec3_array_stride_is_sixteen() {
        let r = reflect(
            "@group(0) @binding(0) var<storage, read> pts: array<vec3<f32>, 5>;",
        )
        .unwrap();
        match &r.resources[0].class {
            ResourceClass::Storage(TypeDescriptor::Array { element, stride, size, count, .. }, Access::Read) => {
                assert_eq!(element.size(), 12);
                assert_eq!(*stride, 16);
                assert_eq!(*count, 5);
                assert_eq!(*size, 80);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn align_and_size_attributes() {
        let r = reflect("struct S { a: u32, @align(16) b: u32, @size(12) c: f32, d: f32 }").unwrap();
        assert_eq!(
            struct_members(&r, "S"),
            vec![
                ("a".into(), 0, 4),
                ("b".into(), 16, 4),
                ("c".into(), 20, 12),
                ("d".into(), 32, 4),
            ]
        );
        assert_eq!(r.struct_type("S").unwrap().size(), 48);
    }

    #[test]
    fn nested_structs_and_matrices() {
        let r = reflect(
            "struct Inner { m: mat3x3f, v: vec2<f32> }\n\
             struct Outer { x: f32, inner: Inner, tail: array<Inner, 2> }",
        )
        .unwrap();
        let inner = r.struct_type("Inner").unwrap();
        assert_eq!(inner.size(), 64);
        assert_eq!(inner.align(), 16);
        assert_eq!(
            struct_members(&r, "Outer"),
            vec![
                ("x".into(), 0, 4),
                ("inner".into(), 16, 64),
                ("tail".into(), 80, 128),
            ]
        );
    }

    #[test]
    fn aliases_and_constants_resolve() {
        let r = reflect(
            "const W = 4;\nconst H = W * 2u;\nalias Row = array<f32, W>;\nalias Grid = array<Row, H>;\n\
             @group(0) @binding(0) var<uniform> g: Grid;",
        )
        .unwrap();
        match &r.resources[0].class {
            ResourceClass::Uniform(ty) => assert_eq!(ty.size(), 4 * 4 * 8),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cyclic_alias_is_an_error() {
        let err = reflect("alias A = B;\nalias B = A;\n@group(0) @binding(0) var<uniform> u: A;")
            .unwrap_err();
        assert!(matches!(err, ReflectError::Cycle { .. }), "{err}");
    }

    #[test]
    fn recursive_struct_is_an_error() {
        let err = reflect("struct Node { next: array<Node, 2> }").unwrap_err();
        assert!(matches!(err, ReflectError::Cycle { ref name, .. } if name == "Node"));
    }

    #[test]
    fn unknown_type_is_reported_with_position() {
        let err = reflect("struct S {\n  a: vec3<f32>,\n  b: Mystery,\n}").unwrap_err();
        match err {
            ReflectError::UnknownType { name, span } => {
                assert_eq!(name, "Mystery");
                assert_eq!(span.line, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn resource_without_binding_is_an_error() {
        let err = reflect("@group(0) var<uniform> u: f32;").unwrap_err();
        assert!(matches!(err, ReflectError::MissingBinding { attribute: "binding", .. }));
        let err = reflect("@group(0) @binding(SLOT) var<uniform> u: f32;").unwrap_err();
        assert!(matches!(err, ReflectError::MissingBinding { .. }));
    }

    #[test]
    fn runtime_array_in_struct_tail() {
        let r = reflect(
            "struct Particles { count: u32, items: array<vec4f> }\n\
             @group(0) @binding(3) var<storage, read_write> ps: Particles;",
        )
        .unwrap();
        let ty = r.struct_type("Particles").unwrap();
        assert!(ty.is_runtime_sized());
        assert_eq!(struct_members(&r, "Particles")[1], ("items".into(), 16, 0));
        assert_eq!(r.resources[0].binding, 3);
    }

    #[test]
    fn handles_and_entry_points() {
        let r = reflect(
            r#"
struct VOut { @builtin(position) pos: vec4f, @location(0) uv: vec2f }
struct Inst { @location(1) offset: vec2f, @location(2) color: vec4f }
@group(0) @binding(0) var samp: sampler;
@group(0) @binding(1) var tex: texture_2d<f32>;
@group(0) @binding(2) var out_tex: texture_storage_2d<rgba8unorm, write>;
const WG = 64;
@vertex fn vs(@builtin(vertex_index) vi: u32, inst: Inst) -> VOut { var o: VOut; return o; }
@fragment fn fs(v: VOut) -> @location(0) vec4f { return v.pos; }
@compute @workgroup_size(WG, 2) fn step(@builtin(global_invocation_id) id: vec3u) {}
"#,
        )
        .unwrap();
        assert_eq!(r.resources.len(), 3);
        assert_eq!(r.resources[0].class, ResourceClass::Sampler { comparison: false });
        match &r.resources[2].class {
            ResourceClass::Texture(kind) => {
                let storage = kind.storage.as_ref().unwrap();
                assert_eq!(storage.format, "rgba8unorm");
                assert_eq!(storage.access, StorageTextureAccess::Write);
            }
            other => panic!("unexpected {other:?}"),
        }
        let vs = &r.entry_points[0];
        assert_eq!(vs.stage, Stage::Vertex);
        let locations: Vec<_> = vs.inputs.iter().map(|i| (i.name.as_str(), i.location)).collect();
        assert_eq!(
            locations,
            vec![("vi", None), ("offset", Some(1)), ("color", Some(2))]
        );
        assert_eq!(vs.inputs[0].builtin.as_deref(), Some("vertex_index"));
        assert_eq!(vs.outputs.len(), 2);
        let compute = &r.entry_points[2];
        assert_eq!(compute.workgroup_size, Some([64, 2, 1]));
    }

    #[test]
    fn private_and_workgroup_vars_are_not_resources() {
        let r = reflect(
            "var<private> seed: u32;\nvar<workgroup> tile: array<f32, 64>;\n\
             @group(0) @binding(0) var<uniform> u: vec4f;",
        )
        .unwrap();
        assert_eq!(r.resources.len(), 1);
        assert_eq!(r.resources[0].name, "u");
    }

    #[test]
    fn oversized_layouts_are_errors() {
        let err = reflect("@group(0) @binding(0) var<storage, read> s: array<vec4f, 300000000>;").unwrap_err();
        assert!(matches!(&err, ReflectError::InvalidType { message, .. } if message == "array size overflows"));

        let err = reflect(
            "struct Big { a: array<vec4f, 200000000>, b: array<vec4f, 200000000> }\n\
             @group(0) @binding(0) var<storage, read> s: Big;",
        )
        .unwrap_err();
        assert!(matches!(&err, ReflectError::InvalidType { message, .. } if message.contains("`Big`")));
    }
}
