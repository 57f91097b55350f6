//! GPU loop canonicalization.
//!
//! Loops mapped to GPU blocks and threads get the canonical index names
//! the device code generator expects (`blockidx`, `threadidx`, with `y`
//! and `z` for outer mapped dimensions) and zero-based minimums, the
//! original variable rebound as `canonical + min`. Host loops that launch
//! the kernel stay outside; a block loop nested inside a thread loop is
//! malformed.

use weft_diagnostic::{CompileError, CompileResult};
use weft_ir::{
    mutate_stmt_children, substitute_in_stmt, walk_stmt, BinOp, DeviceApi, Expr, Mutator, Name,
    Stmt, StmtKind, Visitor,
};

/// Canonicalize every GPU kernel in the tree.
pub fn canonicalize_gpu_loops(stmt: &Stmt) -> CompileResult<Stmt> {
    let mut pass = FindKernels;
    pass.mutate_stmt(stmt)
}

struct FindKernels;

impl Mutator for FindKernels {
    fn mutate_stmt(&mut self, stmt: &Stmt) -> CompileResult<Stmt> {
        if let StmtKind::For { device, .. } = stmt.kind() {
            if *device != DeviceApi::Host {
                // The outermost device loop roots one kernel.
                let (blocks, threads) = count_device_loops(stmt)?;
                let mut rename = RenameKernelLoops {
                    blocks_left: blocks,
                    threads_left: threads,
                    in_thread: false,
                };
                return rename.mutate_stmt(stmt);
            }
        }
        mutate_stmt_children(self, stmt)
    }
}

const AXIS: [&str; 3] = ["x", "y", "z"];

fn canonical_name(base: &str, remaining: usize) -> CompileResult<Name> {
    // The innermost mapped loop is the x axis; with k loops remaining,
    // this one is axis k-1.
    let axis = AXIS.get(remaining - 1).ok_or_else(|| {
        CompileError::unsupported(format!("more than three loops mapped to {base} indices"))
    })?;
    Ok(Name::new(format!("{base}id{axis}")))
}

fn count_device_loops(stmt: &Stmt) -> CompileResult<(usize, usize)> {
    struct Count {
        blocks: usize,
        threads: usize,
    }
    impl Visitor for Count {
        fn visit_stmt(&mut self, stmt: &Stmt) {
            if let StmtKind::For { device, .. } = stmt.kind() {
                match device {
                    DeviceApi::GpuBlock => self.blocks += 1,
                    DeviceApi::GpuThread => self.threads += 1,
                    DeviceApi::Host => {}
                }
            }
            walk_stmt(self, stmt);
        }
    }
    let mut count = Count {
        blocks: 0,
        threads: 0,
    };
    count.visit_stmt(stmt);
    if count.blocks > 3 || count.threads > 3 {
        return Err(CompileError::unsupported(
            "a kernel maps at most three block and three thread dimensions",
        ));
    }
    Ok((count.blocks, count.threads))
}

struct RenameKernelLoops {
    blocks_left: usize,
    threads_left: usize,
    in_thread: bool,
}

impl Mutator for RenameKernelLoops {
    fn mutate_stmt(&mut self, stmt: &Stmt) -> CompileResult<Stmt> {
        if let StmtKind::For {
            name,
            min,
            extent,
            for_type,
            device,
            body,
        } = stmt.kind()
        {
            let canonical = match device {
                DeviceApi::GpuBlock => {
                    if self.in_thread {
                        return Err(CompileError::unsupported(format!(
                            "block loop `{name}` nested inside a thread loop"
                        )));
                    }
                    let n = canonical_name("block", self.blocks_left)?;
                    self.blocks_left -= 1;
                    Some(n)
                }
                DeviceApi::GpuThread => {
                    let n = canonical_name("thread", self.threads_left)?;
                    self.threads_left -= 1;
                    Some(n)
                }
                DeviceApi::Host => None,
            };

            if let Some(canonical) = canonical {
                let saved = self.in_thread;
                self.in_thread = saved || *device == DeviceApi::GpuThread;
                let body = self.mutate_stmt(body)?;
                self.in_thread = saved;
                // Rebind the original variable as canonical + min and
                // zero-base the loop.
                let replacement =
                    Expr::binary(BinOp::Add, Expr::var(canonical.clone()), min.clone())?;
                let body = substitute_in_stmt(name, &replacement, &body)?;
                return Stmt::for_loop(
                    canonical,
                    Expr::int(0),
                    extent.clone(),
                    *for_type,
                    *device,
                    body,
                );
            }
        }
        mutate_stmt_children(self, stmt)
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use weft_ir::ForType;

    fn gpu_for(name: &str, device: DeviceApi, min: i64, extent: i64, body: Stmt) -> Stmt {
        Stmt::for_loop(
            name,
            Expr::int(min),
            Expr::int(extent),
            ForType::Parallel,
            device,
            body,
        )
        .unwrap()
    }

    #[test]
    fn kernel_loops_get_canonical_names() {
        let inner = Stmt::store(
            "out",
            Expr::var("f.xi") + Expr::var("f.xo") * 16,
            Expr::int(1),
        )
        .unwrap();
        let nest = gpu_for(
            "f.xo",
            DeviceApi::GpuBlock,
            0,
            8,
            gpu_for("f.xi", DeviceApi::GpuThread, 0, 16, inner),
        );
        let out = canonicalize_gpu_loops(&nest).unwrap();
        let printed = out.to_string();
        assert!(printed.contains("blockidx"), "{printed}");
        assert!(printed.contains("threadidx"), "{printed}");
        assert!(!printed.contains("f.xo"), "{printed}");
    }

    #[test]
    fn two_block_dimensions_use_x_and_y() {
        let inner = Stmt::store("out", Expr::var("a") + Expr::var("b"), Expr::int(1)).unwrap();
        let nest = gpu_for(
            "a",
            DeviceApi::GpuBlock,
            0,
            4,
            gpu_for("b", DeviceApi::GpuBlock, 0, 4, inner),
        );
        let printed = canonicalize_gpu_loops(&nest).unwrap().to_string();
        // Outer mapped loop is y, inner is x.
        let y_pos = printed.find("blockidy").unwrap();
        let x_pos = printed.find("blockidx").unwrap();
        assert!(y_pos < x_pos, "{printed}");
    }

    #[test]
    fn nonzero_minimum_rebinds_the_variable() {
        let inner = Stmt::store("out", Expr::var("v"), Expr::int(1)).unwrap();
        let nest = gpu_for("v", DeviceApi::GpuThread, 5, 16, inner);
        let printed = canonicalize_gpu_loops(&nest).unwrap().to_string();
        assert!(printed.contains("threadidx in [0, 0 + 16)"), "{printed}");
        assert!(printed.contains("(threadidx + 5)"), "{printed}");
    }

    #[test]
    fn block_inside_thread_is_rejected() {
        let inner = Stmt::store("out", Expr::var("b"), Expr::int(1)).unwrap();
        let nest = gpu_for(
            "t",
            DeviceApi::GpuThread,
            0,
            4,
            gpu_for("b", DeviceApi::GpuBlock, 0, 4, inner),
        );
        assert!(canonicalize_gpu_loops(&nest).is_err());
    }
}
