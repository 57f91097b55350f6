//! Realization injection.
//!
//! Places each materialized producer into the statement tree: its loop
//! nest at the compute level, its `Realize` at the store level. Producers
//! are processed consumers-first, so a producer's own producers can later
//! nest inside the loops this pass creates.
//!
//! The returned site table records, per function, the qualified name of
//! the loop its production sits in (`None` when it sits directly inside
//! its `Realize`); bounds inference and storage folding key off it.

use rustc_hash::{FxHashMap, FxHashSet};
use weft_diagnostic::{CompileError, CompileResult};
use weft_func::Level;
use weft_ir::{
    mutate_stmt_children, walk_stmt, Expr, Mutator, Name, Range, Stmt, StmtKind, Type, Visitor,
};

use crate::env::PipelineEnv;
use crate::nest::{BoundsSource, NestBuilder};

/// Per-function injection site: the loop enclosing the production nest.
pub type SiteTable = FxHashMap<Name, Option<Name>>;

/// Build the output nest and inject every materialized producer.
pub fn build_and_inject(env: &PipelineEnv) -> CompileResult<(Stmt, SiteTable)> {
    let output = env.output_func()?;
    let mut stmt = NestBuilder::new(output, BoundsSource::OutputBuffer)?.build()?;
    let mut sites = SiteTable::default();

    let order = env.realization_order()?;
    for name in order.iter().skip(1) {
        let func = &env.funcs[name];
        let nest = NestBuilder::new(func, BoundsSource::Inferred)?.build()?;
        let bounds: Vec<Range> = func
            .args()
            .iter()
            .map(|arg| {
                Range::new(
                    Expr::var(name.dotted(arg.as_str()).dotted("min")),
                    Expr::var(name.dotted(arg.as_str()).dotted("extent")),
                )
            })
            .collect();
        let types: Vec<Type> = func.output_types();

        let compute = func.schedule().compute_level().clone();
        let store = func.schedule().store_level().clone();
        tracing::debug!(func = %name, ?compute, ?store, "injecting realization");

        match compute {
            Level::Inline => {
                return Err(CompileError::schedule(
                    name.as_str(),
                    "inline producer reached realization injection",
                ));
            }
            Level::Root => {
                stmt = Stmt::realize(
                    name.clone(),
                    types,
                    bounds,
                    Stmt::block(nest, stmt),
                );
                sites.insert(name.clone(), None);
            }
            Level::At { func: consumer, var } => {
                validate_consumer(env, name, &consumer)?;
                let target = consumer.dotted(var.as_str());
                // When store and compute levels coincide, the realize
                // directly wraps the production block and there is no
                // loop between allocation and production.
                let same_level = store
                    == Level::At {
                        func: consumer.clone(),
                        var: var.clone(),
                    };
                stmt = inject_at_loop(&stmt, &target, name, &nest)?;
                match store {
                    Level::Root => {
                        stmt = Stmt::realize(name.clone(), types, bounds, stmt);
                    }
                    Level::At {
                        func: store_consumer,
                        var: store_var,
                    } => {
                        let store_target = store_consumer.dotted(store_var.as_str());
                        stmt = wrap_loop_body_in_realize(
                            &stmt,
                            &store_target,
                            name,
                            types,
                            bounds,
                        )?;
                    }
                    Level::Inline => {
                        return Err(CompileError::schedule(
                            name.as_str(),
                            "store level cannot be inline when the function is computed at a loop",
                        ));
                    }
                }
                // The realize must enclose the production; a store level
                // deeper than the compute level leaves it outside.
                check_realize_encloses_production(&stmt, name)?;
                sites.insert(name.clone(), if same_level { None } else { Some(target) });
            }
        }
    }

    Ok((stmt, sites))
}

/// The consumer a level names must transitively call the producer.
fn validate_consumer(env: &PipelineEnv, producer: &Name, consumer: &Name) -> CompileResult<()> {
    let mut pending = vec![consumer.clone()];
    let mut seen = FxHashSet::default();
    while let Some(name) = pending.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        let Some(func) = env.funcs.get(&name) else {
            return Err(CompileError::schedule(
                producer.as_str(),
                format!("compute_at names `{name}`, which is not in the pipeline"),
            ));
        };
        let callees = PipelineEnv::callees(func);
        if callees.contains(producer) {
            return Ok(());
        }
        pending.extend(callees);
    }
    Err(CompileError::schedule(
        producer.as_str(),
        format!("compute_at names `{consumer}`, which never uses this function"),
    ))
}

struct InjectAtLoop<'a> {
    target: &'a Name,
    payload: &'a Stmt,
    found: bool,
}

impl Mutator for InjectAtLoop<'_> {
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
            if name == self.target {
                self.found = true;
                return Stmt::for_loop(
                    name.clone(),
                    min.clone(),
                    extent.clone(),
                    *for_type,
                    *device,
                    Stmt::block(self.payload.clone(), body.clone()),
                );
            }
        }
        mutate_stmt_children(self, stmt)
    }
}

fn inject_at_loop(
    stmt: &Stmt,
    target: &Name,
    func: &Name,
    nest: &Stmt,
) -> CompileResult<Stmt> {
    let mut injector = InjectAtLoop {
        target,
        payload: nest,
        found: false,
    };
    let out = injector.mutate_stmt(stmt)?;
    if !injector.found {
        return Err(CompileError::schedule(
            func.as_str(),
            format!("compute_at loop `{target}` does not exist in the consumer's nest"),
        ));
    }
    Ok(out)
}

struct WrapInRealize<'a> {
    target: &'a Name,
    func: &'a Name,
    types: Option<Vec<Type>>,
    bounds: Option<Vec<Range>>,
    found: bool,
}

impl Mutator for WrapInRealize<'_> {
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
            if name == self.target {
                self.found = true;
                let types = self.types.take().unwrap_or_default();
                let bounds = self.bounds.take().unwrap_or_default();
                return Stmt::for_loop(
                    name.clone(),
                    min.clone(),
                    extent.clone(),
                    *for_type,
                    *device,
                    Stmt::realize(self.func.clone(), types, bounds, body.clone()),
                );
            }
        }
        mutate_stmt_children(self, stmt)
    }
}

fn wrap_loop_body_in_realize(
    stmt: &Stmt,
    target: &Name,
    func: &Name,
    types: Vec<Type>,
    bounds: Vec<Range>,
) -> CompileResult<Stmt> {
    let mut wrapper = WrapInRealize {
        target,
        func,
        types: Some(types),
        bounds: Some(bounds),
        found: false,
    };
    let out = wrapper.mutate_stmt(stmt)?;
    if !wrapper.found {
        return Err(CompileError::schedule(
            func.as_str(),
            format!("store_at loop `{target}` does not exist in the consumer's nest"),
        ));
    }
    Ok(out)
}

fn check_realize_encloses_production(stmt: &Stmt, func: &Name) -> CompileResult<()> {
    struct Check<'a> {
        func: &'a Name,
        inside_realize: usize,
        ok: bool,
        saw_provide: bool,
    }
    impl Visitor for Check<'_> {
        fn visit_stmt(&mut self, stmt: &Stmt) {
            match stmt.kind() {
                StmtKind::Realize { name, body, .. } if name == self.func => {
                    self.inside_realize += 1;
                    self.visit_stmt(body);
                    self.inside_realize -= 1;
                }
                StmtKind::Provide { name, .. } if name == self.func => {
                    self.saw_provide = true;
                    if self.inside_realize > 0 {
                        self.ok = true;
                    }
                }
                _ => walk_stmt(self, stmt),
            }
        }
    }
    let mut check = Check {
        func,
        inside_realize: 0,
        ok: false,
        saw_provide: false,
    };
    check.visit_stmt(stmt);
    if check.saw_provide && !check.ok {
        return Err(CompileError::schedule(
            func.as_str(),
            "store level is deeper than the compute level",
        ));
    }
    Ok(())
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use weft_func::{Func, ImageParam, Var};

    fn blur_env(schedule: impl FnOnce(&mut Func, &Func)) -> PipelineEnv {
        let (x, y) = (Var::new("x"), Var::new("y"));
        let input = ImageParam::new(Type::uint(16), 2, "input");

        let mut blur_x = Func::new("blur_x");
        blur_x
            .define(
                &[x.clone(), y.clone()],
                vec![
                    (input.at([x.expr() - 1, y.expr()])
                        + input.at([x.expr(), y.expr()])
                        + input.at([x.expr() + 1, y.expr()]))
                        / 3,
                ],
            )
            .unwrap();

        let mut blur_y = Func::new("blur_y");
        blur_y
            .define(
                &[x.clone(), y.clone()],
                vec![
                    (blur_x.at([x.expr(), y.expr() - 1])
                        + blur_x.at([x.expr(), y.expr()])
                        + blur_x.at([x.expr(), y.expr() + 1]))
                        / 3,
                ],
            )
            .unwrap();

        schedule(&mut blur_x, &blur_y);

        let mut funcs = FxHashMap::default();
        funcs.insert(blur_x.name().clone(), blur_x);
        funcs.insert(blur_y.name().clone(), blur_y);
        let mut images = FxHashMap::default();
        images.insert(Name::new("input"), input);
        PipelineEnv {
            funcs,
            images,
            scalar_params: FxHashMap::default(),
            output: Name::new("blur_y"),
        }
    }

    #[test]
    fn root_producer_wraps_the_consumer() {
        let env = blur_env(|bx, _| {
            bx.compute_root();
        });
        let (stmt, sites) = build_and_inject(&env).unwrap();
        let printed = stmt.to_string();
        assert!(printed.starts_with("realize blur_x("), "{printed}");
        assert_eq!(sites[&Name::new("blur_x")], None);
    }

    #[test]
    fn compute_at_injects_into_the_named_loop() {
        let env = blur_env(|bx, by| {
            bx.compute_at(by, &Var::new("y"));
        });
        let (stmt, sites) = build_and_inject(&env).unwrap();
        // Store follows compute by default, so no loop separates the
        // allocation from the production.
        assert_eq!(sites[&Name::new("blur_x")], None);
        let printed = stmt.to_string();
        // The realize sits inside the y loop.
        let y_pos = printed.find("for blur_y.y").unwrap();
        let realize_pos = printed.find("realize blur_x").unwrap();
        assert!(realize_pos > y_pos, "{printed}");
    }

    #[test]
    fn store_root_compute_at_splits_levels() {
        let env = blur_env(|bx, by| {
            bx.compute_at(by, &Var::new("y"));
            bx.store_root();
        });
        let (stmt, sites) = build_and_inject(&env).unwrap();
        assert_eq!(sites[&Name::new("blur_x")], Some(Name::new("blur_y.y")));
        let printed = stmt.to_string();
        let realize_pos = printed.find("realize blur_x").unwrap();
        let y_pos = printed.find("for blur_y.y").unwrap();
        assert!(realize_pos < y_pos, "{printed}");
    }

    #[test]
    fn compute_at_missing_loop_fails() {
        let env = blur_env(|bx, by| {
            bx.compute_at(by, &Var::new("nope"));
        });
        let err = build_and_inject(&env).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn compute_at_non_consumer_fails() {
        let env = blur_env(|bx, _| {
            bx.schedule_mut().compute_at("input", "x");
        });
        assert!(build_and_inject(&env).is_err());
    }
}
