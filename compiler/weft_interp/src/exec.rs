//! The statement executor.
//!
//! Walks a fully lowered tree against bound buffer descriptors. Loop
//! variables and let bindings live in a scope map; buffer descriptor
//! fields (`name.min.0`, `name.elem_size`, …) resolve as parameters
//! straight from the bound [`BufferT`]s, exactly as emitted code would
//! read them.
//!
//! `Parallel` host loops dispatch through `weft_do_par_for`, the same
//! runtime entry compiled pipelines use; each task clones the enclosing
//! scope and runs the body for one index. GPU-marked loops execute
//! serially; the executor stands in for the device, not the code
//! generator.
//!
//! # Safety
//!
//! Stores and loads go through raw pointers shared across worker
//! threads. The lowering guarantees parallel iterations write disjoint
//! indices; the executor adds bounds checks so a miscompiled index
//! surfaces as an error rather than corruption.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use weft_ir::{
    BinOp, CmpOp, DeviceApi, Expr, ExprKind, ForType, Name, Stmt, StmtKind, Type, TypeCode,
};
use weft_rt::{weft_do_par_for, BufferT};

use crate::error::{RunError, RunResult};
use crate::value::Value;

/// A bound external buffer. The pointer stays valid for the run.
#[derive(Clone, Copy)]
struct ExtBuf(*mut BufferT);

// Descriptors are read from worker threads; writes to the data they
// point at are disjoint by construction.
unsafe impl Send for ExtBuf {}
unsafe impl Sync for ExtBuf {}

impl ExtBuf {
    fn descriptor(&self) -> &BufferT {
        unsafe { &*self.0 }
    }
}

/// An internal allocation made by an `Allocate` node.
struct AllocBuf {
    data: *mut u8,
    elems: usize,
    ty: Type,
    layout: Layout,
}

unsafe impl Send for AllocBuf {}
unsafe impl Sync for AllocBuf {}

impl Drop for AllocBuf {
    fn drop(&mut self) {
        if !self.data.is_null() {
            unsafe { dealloc(self.data, self.layout) };
        }
    }
}

/// Per-branch execution state.
#[derive(Default, Clone)]
struct Env {
    vars: FxHashMap<Name, Value>,
    allocs: FxHashMap<Name, Arc<AllocBuf>>,
}

/// Executes lowered statements against bound buffers.
#[derive(Default)]
pub struct Executor {
    buffers: FxHashMap<Name, ExtBuf>,
    scalars: FxHashMap<Name, Value>,
}

impl Executor {
    pub fn new() -> Executor {
        Executor::default()
    }

    /// Bind a buffer argument. `buf` must outlive the run.
    pub fn bind_buffer(&mut self, name: impl Into<Name>, buf: *mut BufferT) {
        self.buffers.insert(name.into(), ExtBuf(buf));
    }

    /// Bind a scalar parameter.
    pub fn bind_scalar(&mut self, name: impl Into<Name>, value: Value) {
        self.scalars.insert(name.into(), value);
    }

    /// Run a lowered pipeline.
    pub fn run(&self, stmt: &Stmt) -> RunResult<()> {
        let mut env = Env::default();
        self.exec(stmt, &mut env)
    }

    fn exec(&self, stmt: &Stmt, env: &mut Env) -> RunResult<()> {
        match stmt.kind() {
            StmtKind::LetStmt { name, value, body } => {
                let v = self.eval(value, env)?;
                let prev = env.vars.insert(name.clone(), v);
                let result = self.exec(body, env);
                restore(&mut env.vars, name, prev);
                result
            }

            StmtKind::AssertStmt { condition, message } => {
                if self.eval(condition, env)?.as_scalar_bool()? {
                    Ok(())
                } else {
                    Err(RunError::AssertionFailure(message.to_string()))
                }
            }

            StmtKind::For {
                name,
                min,
                extent,
                for_type,
                device,
                body,
            } => {
                let min = self.eval(min, env)?.as_scalar_i64()?;
                let extent = self.eval(extent, env)?.as_scalar_i64()?;
                match (for_type, device) {
                    (ForType::Parallel, DeviceApi::Host) => {
                        self.par_for(name, min, extent, body, env)
                    }
                    (ForType::Vectorized | ForType::Unrolled, _) => Err(RunError::eval(
                        format!("loop `{name}` survived lowering with type {for_type:?}"),
                    )),
                    _ => {
                        let prev = env.vars.remove(name);
                        let mut result = Ok(());
                        for i in min..min.saturating_add(extent) {
                            env.vars.insert(name.clone(), Value::int(i));
                            result = self.exec(body, env);
                            if result.is_err() {
                                break;
                            }
                        }
                        restore(&mut env.vars, name, prev);
                        result
                    }
                }
            }

            StmtKind::Store { name, index, value } => {
                let index = self.eval(index, env)?;
                let value = self.eval(value, env)?;
                self.store(name, &index, value, env)
            }

            StmtKind::Allocate {
                name,
                ty,
                extents,
                body,
            } => {
                let mut elems = 1usize;
                for e in extents {
                    let extent = self.eval(e, env)?.as_scalar_i64()?;
                    let extent = usize::try_from(extent).map_err(|_| {
                        RunError::AllocationFailure(format!(
                            "negative extent for `{name}`: {extent}"
                        ))
                    })?;
                    elems = elems.checked_mul(extent).ok_or_else(|| {
                        RunError::AllocationFailure(format!("`{name}` overflows"))
                    })?;
                }
                let alloc = Arc::new(make_alloc(name, *ty, elems)?);
                let prev = env.allocs.insert(name.clone(), alloc);
                let result = self.exec(body, env);
                restore(&mut env.allocs, name, prev);
                result
            }

            StmtKind::Free { name } => {
                env.allocs.remove(name);
                Ok(())
            }

            StmtKind::Block { first, rest } => {
                self.exec(first, env)?;
                self.exec(rest, env)
            }

            StmtKind::IfThenElse {
                condition,
                then_case,
                else_case,
            } => {
                if self.eval(condition, env)?.as_scalar_bool()? {
                    self.exec(then_case, env)
                } else if let Some(else_case) = else_case {
                    self.exec(else_case, env)
                } else {
                    Ok(())
                }
            }

            StmtKind::Evaluate(expr) => {
                self.eval(expr, env)?;
                Ok(())
            }

            StmtKind::Provide { name, .. } => Err(RunError::eval(format!(
                "provide to `{name}` was not lowered to a store"
            ))),
            StmtKind::Realize { name, .. } => Err(RunError::eval(format!(
                "realize of `{name}` was not lowered to an allocation"
            ))),
        }
    }

    fn par_for(
        &self,
        var: &Name,
        min: i64,
        extent: i64,
        body: &Stmt,
        env: &Env,
    ) -> RunResult<()> {
        let (Ok(min32), Ok(size32)) = (i32::try_from(min), i32::try_from(extent)) else {
            return Err(RunError::eval(format!(
                "parallel loop `{var}` range [{min}, {min}+{extent}) exceeds task indices"
            )));
        };

        struct ParClosure<'a> {
            exec: &'a Executor,
            body: &'a Stmt,
            var: &'a Name,
            env: &'a Env,
            error: Mutex<Option<RunError>>,
        }

        extern "C" fn par_task(index: i32, closure: *mut u8) {
            let pc = unsafe { &*closure.cast::<ParClosure>() };
            if let Ok(guard) = pc.error.lock() {
                if guard.is_some() {
                    return;
                }
            }
            let mut env = pc.env.clone();
            env.vars
                .insert(pc.var.clone(), Value::int(i64::from(index)));
            if let Err(e) = pc.exec.exec(pc.body, &mut env) {
                if let Ok(mut guard) = pc.error.lock() {
                    guard.get_or_insert(e);
                }
            }
        }

        let mut closure = ParClosure {
            exec: self,
            body,
            var,
            env,
            error: Mutex::new(None),
        };
        weft_do_par_for(
            par_task,
            min32,
            size32,
            std::ptr::from_mut(&mut closure).cast(),
        );
        match closure.error.into_inner() {
            Ok(maybe) => match maybe {
                Some(e) => Err(e),
                None => Ok(()),
            },
            Err(_) => Err(RunError::eval("a parallel task panicked")),
        }
    }

    fn eval(&self, expr: &Expr, env: &mut Env) -> RunResult<Value> {
        match expr.kind() {
            ExprKind::IntImm(v) => Ok(Value::int(*v)),
            ExprKind::UIntImm(v) => Ok(Value::uint(*v)),
            ExprKind::FloatImm(v) => Ok(Value::float(*v).wrap_to(expr.ty())),
            ExprKind::StringImm(s) => {
                Err(RunError::eval(format!("string `{s}` evaluated as a value")))
            }

            ExprKind::Var(name) => {
                if let Some(v) = env.vars.get(name) {
                    return Ok(v.clone());
                }
                self.lookup_param(name)
            }

            ExprKind::Cast(value) => {
                let v = self.eval(value, env)?;
                v.convert_to(expr.ty())
            }

            ExprKind::Binary { op, a, b } => {
                let va = self.eval(a, env)?;
                let vb = self.eval(b, env)?;
                apply_binary(*op, va, vb, expr.ty())
            }

            ExprKind::Cmp { op, a, b } => {
                let va = self.eval(a, env)?;
                let vb = self.eval(b, env)?;
                apply_cmp(*op, &va, &vb)
            }

            ExprKind::And { a, b } => {
                let va = self.eval(a, env)?;
                let vb = self.eval(b, env)?;
                apply_logical(&va, &vb, |x, y| x && y)
            }

            ExprKind::Or { a, b } => {
                let va = self.eval(a, env)?;
                let vb = self.eval(b, env)?;
                apply_logical(&va, &vb, |x, y| x || y)
            }

            ExprKind::Not(value) => {
                let v = self.eval(value, env)?;
                match v {
                    Value::UInt(lanes) => Ok(Value::UInt(
                        lanes.into_iter().map(|x| u64::from(x == 0)).collect(),
                    )),
                    other => Err(RunError::eval(format!("`!` on {other:?}"))),
                }
            }

            ExprKind::Select {
                condition,
                true_value,
                false_value,
            } => {
                let c = self.eval(condition, env)?;
                let t = self.eval(true_value, env)?;
                let f = self.eval(false_value, env)?;
                apply_select(&c, t, f)
            }

            ExprKind::Load { name, index } => {
                let index = self.eval(index, env)?;
                self.load(name, &index, expr.ty(), env)
            }

            ExprKind::Ramp { base, stride, lanes } => {
                let base = self.eval(base, env)?.as_scalar_i64()?;
                let stride = self.eval(stride, env)?.as_scalar_i64()?;
                Ok(Value::Int(
                    (0..i64::from(*lanes)).map(|i| base + stride * i).collect(),
                ))
            }

            ExprKind::Broadcast { value, lanes } => {
                let v = self.eval(value, env)?;
                let n = usize::from(*lanes);
                Ok(match v {
                    Value::Int(x) => Value::Int(vec![x[0]; n]),
                    Value::UInt(x) => Value::UInt(vec![x[0]; n]),
                    Value::Float(x) => Value::Float(vec![x[0]; n]),
                })
            }

            ExprKind::Let { name, value, body } => {
                let v = self.eval(value, env)?;
                let prev = env.vars.insert(name.clone(), v);
                let result = self.eval(body, env);
                restore(&mut env.vars, name, prev);
                result
            }

            ExprKind::Call { name, kind, .. } => Err(RunError::eval(format!(
                "call to `{name}` ({kind:?}) survived lowering"
            ))),
        }
    }

    /// Resolve a buffer descriptor field or scalar parameter.
    fn lookup_param(&self, name: &Name) -> RunResult<Value> {
        if let Some(v) = self.scalars.get(name) {
            return Ok(v.clone());
        }
        for (buf_name, ext) in &self.buffers {
            let Some(field) = name
                .as_str()
                .strip_prefix(buf_name.as_str())
                .and_then(|rest| rest.strip_prefix('.'))
            else {
                continue;
            };
            let d = ext.descriptor();
            if field == "elem_size" {
                return Ok(Value::int(i64::from(d.elem_size)));
            }
            if field == "device_dirty" {
                return Ok(Value::uint(u64::from(d.dev_dirty)));
            }
            for (prefix, values) in [
                ("min.", &d.min),
                ("extent.", &d.extent),
                ("stride.", &d.stride),
            ] {
                if let Some(dim) = field.strip_prefix(prefix) {
                    if let Ok(dim) = dim.parse::<usize>() {
                        if dim < 4 {
                            return Ok(Value::int(i64::from(values[dim])));
                        }
                    }
                }
            }
        }
        Err(RunError::eval(format!("unbound variable `{name}`")))
    }

    fn store(&self, name: &Name, index: &Value, value: Value, env: &Env) -> RunResult<()> {
        let indices = index.index_lanes()?;
        if let Some(ext) = self.buffers.get(name) {
            let d = ext.descriptor();
            let elem_ty = store_type(&value, d.elem_size)?;
            let total = total_elems(d);
            let value = value.convert_to(elem_ty.with_lanes(1))?;
            for (lane, idx) in indices.iter().enumerate() {
                check_bounds(name, *idx, total)?;
                unsafe {
                    write_elem(d.host, *idx as usize, elem_ty, lane_of(&value, lane));
                }
            }
            return Ok(());
        }
        if let Some(alloc) = env.allocs.get(name) {
            let value = value.convert_to(alloc.ty.element_of())?;
            for (lane, idx) in indices.iter().enumerate() {
                check_bounds(name, *idx, alloc.elems)?;
                unsafe {
                    write_elem(alloc.data, *idx as usize, alloc.ty.element_of(), lane_of(&value, lane));
                }
            }
            return Ok(());
        }
        Err(RunError::BufferPrecondition(format!(
            "store to unknown buffer `{name}`"
        )))
    }

    fn load(&self, name: &Name, index: &Value, ty: Type, env: &Env) -> RunResult<Value> {
        let indices = index.index_lanes()?;
        let elem = ty.element_of();
        if let Some(ext) = self.buffers.get(name) {
            let d = ext.descriptor();
            let total = total_elems(d);
            let mut out = Vec::with_capacity(indices.len());
            for idx in &indices {
                check_bounds(name, *idx, total)?;
                out.push(unsafe { read_elem(d.host, *idx as usize, elem) });
            }
            return collect_lanes(out, elem);
        }
        if let Some(alloc) = env.allocs.get(name) {
            let mut out = Vec::with_capacity(indices.len());
            for idx in &indices {
                check_bounds(name, *idx, alloc.elems)?;
                out.push(unsafe { read_elem(alloc.data, *idx as usize, elem) });
            }
            return collect_lanes(out, elem);
        }
        Err(RunError::BufferPrecondition(format!(
            "load from unknown buffer `{name}`"
        )))
    }
}

fn restore<V>(map: &mut FxHashMap<Name, V>, name: &Name, prev: Option<V>) {
    match prev {
        Some(v) => {
            map.insert(name.clone(), v);
        }
        None => {
            map.remove(name);
        }
    }
}

fn make_alloc(name: &Name, ty: Type, elems: usize) -> RunResult<AllocBuf> {
    let elem_bytes = usize::from(ty.bits.div_ceil(8).max(1));
    let bytes = elems.checked_mul(elem_bytes).filter(|b| *b > 0).unwrap_or(1);
    let layout = Layout::from_size_align(bytes, 32)
        .map_err(|_| RunError::AllocationFailure(format!("layout for `{name}`")))?;
    let data = unsafe { alloc_zeroed(layout) };
    if data.is_null() {
        return Err(RunError::AllocationFailure(format!(
            "{bytes} bytes for `{name}`"
        )));
    }
    Ok(AllocBuf {
        data,
        elems,
        ty,
        layout,
    })
}

fn total_elems(d: &BufferT) -> usize {
    let mut elems = 1i64;
    for dim in 0..4 {
        elems *= i64::from(d.extent[dim].max(1));
    }
    usize::try_from(elems).unwrap_or(0)
}

fn check_bounds(name: &Name, idx: i64, total: usize) -> RunResult<()> {
    if idx < 0 || idx as usize >= total {
        return Err(RunError::BufferPrecondition(format!(
            "index {idx} outside `{name}` (of {total} elements)"
        )));
    }
    Ok(())
}

/// The element type a store into an external buffer uses: the value's
/// domain at the descriptor's width.
fn store_type(value: &Value, elem_size: i32) -> RunResult<Type> {
    let bits = u8::try_from(elem_size * 8)
        .map_err(|_| RunError::BufferPrecondition(format!("element size {elem_size}")))?;
    let code = match value {
        Value::Int(_) => TypeCode::Int,
        Value::UInt(_) => TypeCode::UInt,
        Value::Float(_) => TypeCode::Float,
    };
    Ok(Type::new(code, bits, 1))
}

fn lane_of(value: &Value, lane: usize) -> ScalarBits {
    match value {
        Value::Int(v) => ScalarBits::Int(v[lane.min(v.len() - 1)]),
        Value::UInt(v) => ScalarBits::UInt(v[lane.min(v.len() - 1)]),
        Value::Float(v) => ScalarBits::Float(v[lane.min(v.len() - 1)]),
    }
}

enum ScalarBits {
    Int(i64),
    UInt(u64),
    Float(f64),
}

unsafe fn write_elem(base: *mut u8, index: usize, ty: Type, value: ScalarBits) {
    let bytes = usize::from(ty.bits.div_ceil(8).max(1));
    let p = base.add(index * bytes);
    match (ty.code, value) {
        (TypeCode::Int, ScalarBits::Int(v)) => match bytes {
            1 => p.cast::<i8>().write_unaligned(v as i8),
            2 => p.cast::<i16>().write_unaligned(v as i16),
            4 => p.cast::<i32>().write_unaligned(v as i32),
            _ => p.cast::<i64>().write_unaligned(v),
        },
        (TypeCode::UInt, ScalarBits::UInt(v)) => match bytes {
            1 => p.write(v as u8),
            2 => p.cast::<u16>().write_unaligned(v as u16),
            4 => p.cast::<u32>().write_unaligned(v as u32),
            _ => p.cast::<u64>().write_unaligned(v),
        },
        (TypeCode::Float, ScalarBits::Float(v)) => match bytes {
            4 => p.cast::<f32>().write_unaligned(v as f32),
            _ => p.cast::<f64>().write_unaligned(v),
        },
        // convert_to aligned the domains before the write.
        _ => {}
    }
}

unsafe fn read_elem(base: *const u8, index: usize, ty: Type) -> ScalarBits {
    let bytes = usize::from(ty.bits.div_ceil(8).max(1));
    let p = base.add(index * bytes);
    match ty.code {
        TypeCode::Int => ScalarBits::Int(match bytes {
            1 => i64::from(p.cast::<i8>().read_unaligned()),
            2 => i64::from(p.cast::<i16>().read_unaligned()),
            4 => i64::from(p.cast::<i32>().read_unaligned()),
            _ => p.cast::<i64>().read_unaligned(),
        }),
        TypeCode::UInt | TypeCode::Handle => ScalarBits::UInt(match bytes {
            1 => u64::from(p.read()),
            2 => u64::from(p.cast::<u16>().read_unaligned()),
            4 => u64::from(p.cast::<u32>().read_unaligned()),
            _ => p.cast::<u64>().read_unaligned(),
        }),
        TypeCode::Float => ScalarBits::Float(match bytes {
            4 => f64::from(p.cast::<f32>().read_unaligned()),
            _ => p.cast::<f64>().read_unaligned(),
        }),
    }
}

fn collect_lanes(scalars: Vec<ScalarBits>, ty: Type) -> RunResult<Value> {
    let value = match ty.code {
        TypeCode::Int => Value::Int(
            scalars
                .into_iter()
                .map(|s| match s {
                    ScalarBits::Int(v) => v,
                    ScalarBits::UInt(v) => v as i64,
                    ScalarBits::Float(v) => v as i64,
                })
                .collect(),
        ),
        TypeCode::UInt | TypeCode::Handle => Value::UInt(
            scalars
                .into_iter()
                .map(|s| match s {
                    ScalarBits::Int(v) => v as u64,
                    ScalarBits::UInt(v) => v,
                    ScalarBits::Float(v) => v as u64,
                })
                .collect(),
        ),
        TypeCode::Float => Value::Float(
            scalars
                .into_iter()
                .map(|s| match s {
                    ScalarBits::Int(v) => v as f64,
                    ScalarBits::UInt(v) => v as f64,
                    ScalarBits::Float(v) => v,
                })
                .collect(),
        ),
    };
    Ok(value)
}

fn apply_binary(op: BinOp, a: Value, b: Value, ty: Type) -> RunResult<Value> {
    if a.lanes() != b.lanes() {
        return Err(RunError::eval(format!(
            "operands of `{}` have {} and {} lanes",
            op.symbol(),
            a.lanes(),
            b.lanes()
        )));
    }
    let out = match (a, b) {
        (Value::Int(x), Value::Int(y)) => {
            let mut out = Vec::with_capacity(x.len());
            for (a, b) in x.into_iter().zip(y) {
                out.push(int_binop(op, a, b)?);
            }
            Value::Int(out)
        }
        (Value::UInt(x), Value::UInt(y)) => {
            let mut out = Vec::with_capacity(x.len());
            for (a, b) in x.into_iter().zip(y) {
                out.push(uint_binop(op, a, b)?);
            }
            Value::UInt(out)
        }
        (Value::Float(x), Value::Float(y)) => Value::Float(
            x.into_iter()
                .zip(y)
                .map(|(a, b)| float_binop(op, a, b))
                .collect(),
        ),
        (a, b) => {
            return Err(RunError::eval(format!(
                "mixed-domain arithmetic: {a:?} {} {b:?}",
                op.symbol()
            )))
        }
    };
    Ok(out.wrap_to(ty))
}

fn int_binop(op: BinOp, a: i64, b: i64) -> RunResult<i64> {
    Ok(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(RunError::eval("integer division by zero"));
            }
            let q = a.wrapping_div(b);
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(RunError::eval("integer modulo by zero"));
            }
            let r = a.wrapping_rem(b);
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }
        BinOp::Min => a.min(b),
        BinOp::Max => a.max(b),
    })
}

fn uint_binop(op: BinOp, a: u64, b: u64) -> RunResult<u64> {
    Ok(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::Div => {
            if b == 0 {
                return Err(RunError::eval("integer division by zero"));
            }
            a / b
        }
        BinOp::Mod => {
            if b == 0 {
                return Err(RunError::eval("integer modulo by zero"));
            }
            a % b
        }
        BinOp::Min => a.min(b),
        BinOp::Max => a.max(b),
    })
}

fn float_binop(op: BinOp, a: f64, b: f64) -> f64 {
    match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => a / b,
        BinOp::Mod => a - (a / b).floor() * b,
        BinOp::Min => a.min(b),
        BinOp::Max => a.max(b),
    }
}

fn apply_cmp(op: CmpOp, a: &Value, b: &Value) -> RunResult<Value> {
    fn lanes<T: PartialOrd>(op: CmpOp, a: &[T], b: &[T]) -> Vec<u64> {
        a.iter()
            .zip(b)
            .map(|(x, y)| {
                let holds = match op {
                    CmpOp::Eq => x == y,
                    CmpOp::Ne => x != y,
                    CmpOp::Lt => x < y,
                    CmpOp::Le => x <= y,
                    CmpOp::Gt => x > y,
                    CmpOp::Ge => x >= y,
                };
                u64::from(holds)
            })
            .collect()
    }
    let out = match (a, b) {
        (Value::Int(x), Value::Int(y)) => lanes(op, x, y),
        (Value::UInt(x), Value::UInt(y)) => lanes(op, x, y),
        (Value::Float(x), Value::Float(y)) => lanes(op, x, y),
        _ => {
            return Err(RunError::eval(format!(
                "mixed-domain comparison: {a:?} {} {b:?}",
                op.symbol()
            )))
        }
    };
    Ok(Value::UInt(out))
}

fn apply_logical(a: &Value, b: &Value, f: impl Fn(bool, bool) -> bool) -> RunResult<Value> {
    match (a, b) {
        (Value::UInt(x), Value::UInt(y)) if x.len() == y.len() => Ok(Value::UInt(
            x.iter()
                .zip(y)
                .map(|(p, q)| u64::from(f(*p != 0, *q != 0)))
                .collect(),
        )),
        _ => Err(RunError::eval(format!("logical op on {a:?} and {b:?}"))),
    }
}

fn apply_select(c: &Value, t: Value, f: Value) -> RunResult<Value> {
    let Value::UInt(conds) = c else {
        return Err(RunError::eval(format!("select condition {c:?}")));
    };
    if conds.len() == 1 {
        return Ok(if conds[0] != 0 { t } else { f });
    }
    if t.lanes() != conds.len() || f.lanes() != conds.len() {
        return Err(RunError::eval("select lane mismatch"));
    }
    let out = match (t, f) {
        (Value::Int(x), Value::Int(y)) => Value::Int(
            conds
                .iter()
                .zip(x.into_iter().zip(y))
                .map(|(c, (a, b))| if *c != 0 { a } else { b })
                .collect(),
        ),
        (Value::UInt(x), Value::UInt(y)) => Value::UInt(
            conds
                .iter()
                .zip(x.into_iter().zip(y))
                .map(|(c, (a, b))| if *c != 0 { a } else { b })
                .collect(),
        ),
        (Value::Float(x), Value::Float(y)) => Value::Float(
            conds
                .iter()
                .zip(x.into_iter().zip(y))
                .map(|(c, (a, b))| if *c != 0 { a } else { b })
                .collect(),
        ),
        _ => return Err(RunError::eval("select branch domain mismatch")),
    };
    Ok(out)
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn exec_on(out: &mut [i32], stmt: &Stmt) {
        let mut buf = BufferT::dense(out.as_mut_ptr().cast(), &[out.len() as i32], 4);
        let mut e = Executor::new();
        e.bind_buffer("out", &mut buf);
        e.run(stmt).unwrap();
    }

    #[test]
    fn serial_loop_stores() {
        let body = Stmt::store("out", Expr::var("i"), Expr::var("i") * 3).unwrap();
        let stmt = Stmt::serial_for("i", Expr::int(0), Expr::int(8), body).unwrap();
        let mut out = [0i32; 8];
        exec_on(&mut out, &stmt);
        assert_eq!(out, [0, 3, 6, 9, 12, 15, 18, 21]);
    }

    #[test]
    fn vector_store_writes_all_lanes() {
        let idx = Expr::ramp(Expr::int(0), Expr::int(1), 4).unwrap();
        let val = Expr::ramp(Expr::int(10), Expr::int(10), 4).unwrap();
        let stmt = Stmt::store("out", idx, val).unwrap();
        let mut out = [0i32; 4];
        exec_on(&mut out, &stmt);
        assert_eq!(out, [10, 20, 30, 40]);
    }

    #[test]
    fn parallel_loop_matches_serial(){
        let body = Stmt::store("out", Expr::var("i"), Expr::var("i") + 100).unwrap();
        let par = Stmt::for_loop(
            "i",
            Expr::int(0),
            Expr::int(64),
            ForType::Parallel,
            DeviceApi::Host,
            body,
        )
        .unwrap();
        let mut out = [0i32; 64];
        exec_on(&mut out, &par);
        let expected: Vec<i32> = (0..64).map(|i| i + 100).collect();
        assert_eq!(out.to_vec(), expected);
    }

    #[test]
    fn allocations_are_scoped_and_zeroed() {
        // allocate t[4]; t[2] = 7; out[0] = t[2] + t[1]
        let store_t = Stmt::store("t", Expr::int(2), Expr::int(7)).unwrap();
        let load = Expr::load(Type::int32(), "t", Expr::int(2)).unwrap();
        let load_zero = Expr::load(Type::int32(), "t", Expr::int(1)).unwrap();
        let store_out = Stmt::store("out", Expr::int(0), load + load_zero).unwrap();
        let body = Stmt::block(store_t, store_out);
        let stmt = Stmt::allocate("t", Type::int32(), vec![Expr::int(4)], body);
        let mut out = [0i32; 1];
        exec_on(&mut out, &stmt);
        assert_eq!(out[0], 7);
    }

    #[test]
    fn out_of_bounds_store_is_reported() {
        let stmt = Stmt::store("out", Expr::int(99), Expr::int(1)).unwrap();
        let mut out = [0i32; 4];
        let mut buf = BufferT::dense(out.as_mut_ptr().cast(), &[4], 4);
        let mut e = Executor::new();
        e.bind_buffer("out", &mut buf);
        let err = e.run(&stmt).unwrap_err();
        assert!(matches!(err, RunError::BufferPrecondition(_)));
    }

    #[test]
    fn buffer_descriptor_fields_resolve() {
        let body = Stmt::store("out", Expr::var("i"), Expr::var("out.extent.0")).unwrap();
        let stmt = Stmt::serial_for(
            "i",
            Expr::var("out.min.0"),
            Expr::var("out.extent.0"),
            body,
        )
        .unwrap();
        let mut out = [0i32; 4];
        exec_on(&mut out, &stmt);
        assert_eq!(out, [4; 4]);
    }

    #[test]
    fn failed_assert_reports_its_message() {
        let cond = Expr::cmp(CmpOp::Eq, Expr::var("out.elem_size"), Expr::int(8)).unwrap();
        let stmt = Stmt::assert_stmt(cond, "wrong element size").unwrap();
        let mut out = [0i32; 1];
        let mut buf = BufferT::dense(out.as_mut_ptr().cast(), &[1], 4);
        let mut e = Executor::new();
        e.bind_buffer("out", &mut buf);
        let err = e.run(&stmt).unwrap_err();
        assert_eq!(err.to_string(), "assertion failed: wrong element size");
    }

    #[test]
    fn uint16_arithmetic_wraps() {
        // (60000 + 60000) in uint16 is 54464.
        let a = Expr::cast(Type::uint(16), Expr::int(60000)).unwrap();
        let sum = Expr::binary(BinOp::Add, a.clone(), a).unwrap();
        let as_int = Expr::cast(Type::int32(), sum).unwrap();
        let stmt = Stmt::store("out", Expr::int(0), as_int).unwrap();
        let mut out = [0i32; 1];
        exec_on(&mut out, &stmt);
        assert_eq!(out[0], (60000 + 60000) % 65536);
    }
}
