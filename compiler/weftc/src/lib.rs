//! The Weft compiler driver.
//!
//! Assembles an algorithm's functions and inputs into a [`Pipeline`],
//! compiles it against a [`Target`] through the lowering pipeline, and
//! hands the result to a code generator, or, during development and in
//! tests, to the reference executor via [`CompiledModule::realize`].

pub mod demo;
mod tracing_setup;

pub use tracing_setup::init_tracing;

use rustc_hash::FxHashMap;
use weft_diagnostic::CompileResult;
use weft_func::{Func, ImageParam};
use weft_interp::{Executor, RunError, Value};
use weft_ir::{Name, Stmt, Type};
use weft_lower::PipelineEnv;
use weft_rt::BufferT;
use weft_target::Target;

/// One argument of the compiled routine's signature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Argument {
    pub name: Name,
    pub is_buffer: bool,
    /// Whether the routine reads/writes the buffer. Buffers default to
    /// both; scalars to neither.
    pub read: bool,
    pub write: bool,
    pub ty: Type,
}

impl Argument {
    pub fn buffer(name: impl Into<Name>, ty: Type) -> Argument {
        Argument {
            name: name.into(),
            is_buffer: true,
            read: true,
            write: true,
            ty,
        }
    }

    pub fn scalar(name: impl Into<Name>, ty: Type) -> Argument {
        Argument {
            name: name.into(),
            is_buffer: false,
            read: false,
            write: false,
            ty,
        }
    }
}

/// An algorithm plus its inputs, ready to compile.
pub struct Pipeline {
    funcs: Vec<Func>,
    images: Vec<ImageParam>,
    scalars: Vec<(Name, Type)>,
    output: Name,
}

impl Pipeline {
    /// A pipeline producing `output`. Producer functions and inputs are
    /// registered with the `with_*` builders.
    pub fn new(output: Func) -> Pipeline {
        let name = output.name().clone();
        Pipeline {
            funcs: vec![output],
            images: Vec::new(),
            scalars: Vec::new(),
            output: name,
        }
    }

    pub fn with_func(mut self, func: Func) -> Pipeline {
        self.funcs.push(func);
        self
    }

    pub fn with_image(mut self, image: ImageParam) -> Pipeline {
        self.images.push(image);
        self
    }

    pub fn with_scalar(mut self, name: impl Into<Name>, ty: Type) -> Pipeline {
        self.scalars.push((name.into(), ty));
        self
    }

    fn env(&self) -> PipelineEnv {
        let mut funcs = FxHashMap::default();
        for f in &self.funcs {
            funcs.insert(f.name().clone(), f.clone());
        }
        let mut images = FxHashMap::default();
        for im in &self.images {
            images.insert(im.name().clone(), im.clone());
        }
        let mut scalar_params = FxHashMap::default();
        for (name, ty) in &self.scalars {
            scalar_params.insert(name.clone(), *ty);
        }
        PipelineEnv {
            funcs,
            images,
            scalar_params,
            output: self.output.clone(),
        }
    }

    /// Lower for `target` and infer the argument signature.
    pub fn compile(&self, target: &Target) -> CompileResult<CompiledModule> {
        let env = self.env();
        let stmt = weft_lower::lower(&env, target)?;

        // Inputs first (sorted for a stable signature), scalars, then
        // the output buffers.
        let mut arguments = Vec::new();
        let mut images: Vec<_> = self.images.clone();
        images.sort_by(|a, b| a.name().cmp(b.name()));
        for im in images {
            arguments.push(Argument::buffer(im.name().clone(), im.ty()));
        }
        let mut scalars = self.scalars.clone();
        scalars.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, ty) in scalars {
            arguments.push(Argument::scalar(name, ty));
        }
        for (name, ty, _) in weft_lower::buffer_args(&env) {
            if !arguments.iter().any(|a| a.name == name) {
                arguments.push(Argument::buffer(name, ty));
            }
        }

        Ok(CompiledModule {
            stmt,
            arguments,
            target: *target,
        })
    }
}

/// A lowered pipeline plus its signature: what an external code
/// generator consumes, and what the reference executor runs.
pub struct CompiledModule {
    pub stmt: Stmt,
    pub arguments: Vec<Argument>,
    pub target: Target,
}

impl CompiledModule {
    /// Execute with the reference executor. Buffer descriptors are bound
    /// by argument name; scalar arguments by value.
    pub fn realize(
        &self,
        buffers: &mut [(&str, &mut BufferT)],
        scalars: &[(&str, Value)],
    ) -> Result<(), RunError> {
        let mut executor = Executor::new();
        for (name, buf) in buffers {
            executor.bind_buffer(*name, std::ptr::from_mut::<BufferT>(&mut **buf));
        }
        for (name, value) in scalars {
            executor.bind_scalar(*name, value.clone());
        }
        executor.run(&self.stmt)
    }
}
