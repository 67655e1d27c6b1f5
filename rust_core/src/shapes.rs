use crate::data::Bindings;
use crate::error::{CompileError, CompileResult};
use crate::graph::VarId;
use indexmap::IndexMap;

#[derive(Debug, Clone, Default)]
pub struct Shapes {
    map: IndexMap<String, Vec<usize>>,
}

impl Shapes {
    pub fn get(&self, name: &str) -> Option<&[usize]> {
        self.map.get(name).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<usize>)> {
        self.map.iter()
    }

    /// Check that `var` has the rank and bounds of its resolved shape.
    pub fn check(&self, var: &VarId) -> CompileResult<()> {
        let shape = self
            .get(&var.name)
            .ok_or_else(|| CompileError::UnresolvedIdentifier(var.to_string()))?;
        if shape.len() != var.indices.len() {
            return Err(CompileError::Shape(format!(
                "`{var}` uses {} indices but `{}` has {} dimensions",
                var.indices.len(),
                var.name,
                shape.len()
            )));
        }
        for (dim, (&i, &extent)) in var.indices.iter().zip(shape).enumerate() {
            if i == 0 || i > extent {
                return Err(CompileError::Shape(format!(
                    "`{var}`: index {i} out of bounds 1..={extent} in dimension {}",
                    dim + 1
                )));
            }
        }
        Ok(())
    }
}

/// Resolve the shape of every name defined by a statement, bound in data, or
/// declared. Precedence: data, then declaration, then the largest index used
/// on a left-hand side.
pub fn resolve_shapes<'a>(
    defined: impl IntoIterator<Item = &'a VarId>,
    data: &Bindings,
    declarations: &IndexMap<String, Vec<usize>>,
) -> CompileResult<Shapes> {
    let mut uses: IndexMap<&str, Vec<&VarId>> = IndexMap::new();
    for var in defined {
        uses.entry(var.name.as_str()).or_default().push(var);
    }

    let mut shapes = Shapes::default();
    for (name, value) in data.iter() {
        shapes.map.insert(name.clone(), value.shape().to_vec());
    }
    for (name, declared) in declarations {
        if let Some(existing) = shapes.map.get(name) {
            if existing != declared {
                return Err(CompileError::Shape(format!(
                    "`{name}` is declared with shape {declared:?} but data has shape {existing:?}"
                )));
            }
        } else {
            shapes.map.insert(name.clone(), declared.clone());
        }
    }

    for (name, vars) in &uses {
        let rank = vars[0].indices.len();
        if let Some(other) = vars.iter().find(|v| v.indices.len() != rank) {
            return Err(CompileError::Shape(format!(
                "ambiguous dimension for `{name}`: defined as both `{}` and `{}`",
                vars[0], other
            )));
        }
        match shapes.map.get(*name) {
            Some(_) => {
                for var in vars {
                    shapes.check(var)?;
                }
            }
            None => {
                let mut extent = vec![0usize; rank];
                for var in vars {
                    for (e, &i) in extent.iter_mut().zip(&var.indices) {
                        *e = (*e).max(i);
                    }
                }
                shapes.map.insert(name.to_string(), extent);
            }
        }
    }

    tracing::debug!(names = shapes.map.len(), "shapes resolved");
    Ok(shapes)
}
