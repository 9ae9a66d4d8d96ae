//! Pass driver: one tile-IR kernel module in, one lowered module out.
//!
//! Pipeline:
//!
//! ```text
//!   options + module ── validate ── axis analysis ── smem allocation
//!        │
//!        ▼
//!   kernel function (params, nvvm attributes, @global_smem address)
//!        │
//!        ▼
//!   for each op: first matching pattern, under a checkpoint
//!        Ok            map the result
//!        recoverable   roll back, record, keep going
//!        invariant     stop
//! ```

use tracing::{debug, info};

use crate::analysis::{Allocation, AxisAnalysis, SharedMemoryPlan};
use crate::config::{ConfigError, LowerOptions, SHARED_ADDRESS_SPACE, SHARED_MEMORY_GLOBAL, WARP_SIZE};
use crate::convert::{convert_type, populate_patterns, ConversionPattern, RewriteCtx};
use crate::diagnostic::Diagnostic;
use crate::error::LowerError;
use crate::ir::builder::FunctionBuilder;
use crate::ir::{self, Global, Linkage, Type};
use crate::location::Location;
use crate::tensor::{Kernel, OpId, Operation, TensorModule};

/// Lower `module`, collecting every diagnostic the pass produces.
pub fn lower_module(module: &TensorModule, options: &LowerOptions) -> Result<ir::Module, Vec<Diagnostic>> {
    let config_error = |e: ConfigError| {
        vec![Diagnostic::error(e.to_string(), Location::unknown())]
    };
    options.validate().map_err(config_error)?;
    let num_warps = options
        .resolve_num_warps(module.num_warps)
        .map_err(config_error)?;
    lower_kernel(&module.kernel, options, num_warps)
}

fn diagnostic(err: &LowerError, op_name: &str, loc: Location) -> Diagnostic {
    let diag = Diagnostic::error(format!("cannot lower `{}`", op_name), loc).with_note(err.to_string());
    match err {
        LowerError::NotImplemented(_) => {
            diag.with_help("only blocked and slice-of-blocked layouts are lowered".to_string())
        }
        _ => diag,
    }
}

fn fatal(err: LowerError) -> Vec<Diagnostic> {
    vec![Diagnostic::error(err.to_string(), Location::unknown())]
}

/// Every layout must distribute over exactly `num_warps` warps.
fn check_warps(kernel: &Kernel, num_warps: u32) -> Result<(), Diagnostic> {
    let args = kernel.args.iter().map(|a| (&a.ty, Location::unknown()));
    let results = kernel
        .body
        .iter()
        .filter_map(|op| op.ty.as_ref().map(|t| (t, op.location())));
    for (ty, loc) in args.chain(results) {
        let Some(t) = ty.as_tensor() else { continue };
        if let Some(n) = t.layout.num_warps() {
            if n != num_warps {
                return Err(Diagnostic::error(
                    format!("layout {} spans {} warps, kernel has {}", t.layout, n, num_warps),
                    loc,
                )
                .with_note("invariant violated: warps_per_cta must multiply to num_warps".to_string()));
            }
        }
    }
    Ok(())
}

// ─── Kernel ────────────────────────────────────────────────────────

fn lower_kernel(kernel: &Kernel, options: &LowerOptions, num_warps: u32) -> Result<ir::Module, Vec<Diagnostic>> {
    let types = kernel.value_types().map_err(fatal)?;
    check_warps(kernel, num_warps).map_err(|d| vec![d])?;

    let axis = AxisAnalysis::run(kernel);
    let smem = Allocation::run(kernel, options.smem_alignment).map_err(fatal)?;
    info!(
        kernel = %kernel.name,
        num_warps,
        smem_bytes = smem.total_bytes(),
        "lowering kernel"
    );

    let mut builder = FunctionBuilder::new(kernel.name.clone());
    builder.set_attr("nvvm.kernel", 1, 1);
    builder.set_attr("nvvm.maxntid", i64::from(WARP_SIZE * num_warps), 32);
    let mut params = Vec::with_capacity(kernel.args.len());
    for arg in &kernel.args {
        let ty = convert_type(&arg.ty).map_err(fatal)?;
        params.push((arg.id, builder.param(ty)));
    }
    let smem_base = builder.address_of(SHARED_MEMORY_GLOBAL, Type::ptr(Type::Int(8), SHARED_ADDRESS_SPACE));

    let mut cx = RewriteCtx::new(
        builder,
        &types,
        kernel.constants(),
        &axis,
        &smem,
        smem_base,
        num_warps,
    );
    for (id, value) in params {
        cx.map(id, value);
    }

    let patterns = populate_patterns();
    let mut diagnostics = Vec::new();
    for (id, op) in kernel.ops() {
        let loc = op.location();
        let name = op.kind.name();
        cx.builder
            .set_loc(if options.emit_locations { op.loc } else { None });

        let Some(pattern) = patterns.iter().find(|p| p.matches(op)) else {
            diagnostics.push(diagnostic(
                &LowerError::match_failure("no lowering pattern"),
                name,
                loc,
            ));
            continue;
        };

        let checkpoint = cx.builder.checkpoint();
        match apply(pattern.as_ref(), id, op, &mut cx) {
            Ok(()) => debug!(op = id.0, pattern = pattern.name(), "lowered"),
            Err(err) if err.is_recoverable() => {
                debug!(op = id.0, %err, "rolled back");
                cx.builder.rollback(&checkpoint);
                diagnostics.push(diagnostic(&err, name, loc));
            }
            Err(err) => {
                diagnostics.push(diagnostic(&err, name, loc));
                return Err(diagnostics);
            }
        }
    }

    if !diagnostics.is_empty() {
        return Err(diagnostics);
    }

    let mut builder = cx.builder;
    builder.set_loc(None);
    let current = builder.current_block();
    if !builder.is_terminated(current) {
        builder.ret();
    }

    Ok(ir::Module {
        globals: vec![Global {
            name: SHARED_MEMORY_GLOBAL.to_string(),
            ty: Type::array(smem.total_bytes(), Type::Int(8)),
            space: SHARED_ADDRESS_SPACE,
            linkage: Linkage::Internal,
        }],
        functions: vec![builder.finish()],
    })
}

fn apply(pattern: &dyn ConversionPattern, id: OpId, op: &Operation, cx: &mut RewriteCtx<'_>) -> Result<(), LowerError> {
    let lowered = pattern.rewrite(id, op, cx)?;
    match (op.result, lowered) {
        (Some(result), Some(value)) => {
            cx.map(result, value);
            Ok(())
        }
        (None, _) => Ok(()),
        (Some(result), None) => Err(LowerError::invariant(format!(
            "{} produced no value for {}",
            pattern.name(),
            result
        ))),
    }
}
