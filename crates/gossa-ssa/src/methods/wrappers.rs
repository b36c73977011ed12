use std::sync::Arc;

use gossa_core::error::Result;
use gossa_core::ir::{CallCommon, Function, FunctionBody, Value};
use gossa_core::span::Span;
use gossa_core::types::{Object, Signature, Type};
use gossa_core::debug;

use crate::emit::FnState;
use crate::invariant_bail;
use crate::methods::MethodSelection;
use crate::passes;
use crate::program::Program;

/// What a synthetic function does.
#[derive(Debug, Clone)]
pub(crate) enum Recipe {
    /// Calls a method of `recv` reached through embedded fields or an
    /// implicit pointer dereference.
    Promoted { recv: Type, sel: MethodSelection },
    /// The method expression `T.m`: like `Promoted`, with the receiver
    /// passed as the first parameter.
    Thunk { recv: Type, sel: MethodSelection },
    /// The method value `x.m`: the receiver is the closure's only free
    /// variable.
    Bound { method: Object },
}

/// A function the builder creates on demand, together with what its body
/// must do. Built at most once, by whichever thread gets to it first.
#[derive(Debug)]
pub(crate) struct Synthetic {
    pub func: Arc<Function>,
    pub recipe: Recipe,
}

impl Synthetic {
    pub fn promoted(recv: &Type, sel: MethodSelection) -> Self {
        let method = &sel.obj;
        let sig = method_sig(method);
        let recv_var = Object::var(None, "recv", recv.clone());
        let func = Function::new(method.name(), sig.without_recv().with_recv(recv_var))
            .with_qualifier(recv.clone())
            .synthetic(format!("wrapper for {}", method.full_name()));
        Self {
            func: Arc::new(func),
            recipe: Recipe::Promoted {
                recv: recv.clone(),
                sel,
            },
        }
    }

    pub fn thunk(recv: &Type, sel: MethodSelection) -> Self {
        let method = &sel.obj;
        let mut sig = method_sig(method).without_recv();
        sig.params.insert(0, Object::var(None, "recv", recv.clone()));
        let func = Function::new(format!("{}$thunk", method.name()), sig)
            .with_qualifier(recv.clone())
            .synthetic(format!("thunk for {}", method.full_name()));
        Self {
            func: Arc::new(func),
            recipe: Recipe::Thunk {
                recv: recv.clone(),
                sel,
            },
        }
    }

    pub fn bound(method: &Object) -> Self {
        let sig = method_sig(method).without_recv();
        let mut func = Function::new(format!("{}$bound", method.name()), sig)
            .synthetic(format!("bound method wrapper for {}", method.full_name()));
        if let Some(recv) = method.recv() {
            func = func.with_qualifier(recv.ty().clone());
        }
        Self {
            func: Arc::new(func),
            recipe: Recipe::Bound {
                method: method.clone(),
            },
        }
    }
}

fn method_sig(method: &Object) -> Signature {
    method
        .signature()
        .cloned()
        .unwrap_or_else(|| Signature::new(Vec::new(), Vec::new(), false))
}

/// Builds and publishes the body of `synth` unless that already happened.
pub(crate) fn build_synthetic(prog: &Program, synth: &Synthetic) -> Result<()> {
    let mut built = false;
    synth
        .func
        .get_or_build(|| {
            built = true;
            debug!("building {}", synth.func.relative_name(None));
            let body = match &synth.recipe {
                Recipe::Promoted { recv, sel } | Recipe::Thunk { recv, sel } => {
                    build_wrapper(prog, &synth.func, recv, sel)?
                }
                Recipe::Bound { method } => build_bound(prog, &synth.func, method)?,
            };
            Ok(body)
        })?;
    if built {
        passes::log_function(prog, &synth.func);
    }
    Ok(())
}

/// Parameters for every receiver and parameter of the function's signature,
/// named after the signature's variables.
fn create_params(state: &mut FnState) -> Vec<Value> {
    let sig = state.func.sig.clone();
    sig.recv
        .iter()
        .chain(&sig.params)
        .enumerate()
        .map(|(i, var)| {
            let name = match var.name() {
                "" | "_" => format!("arg{i}"),
                name => name.to_string(),
            };
            state.add_param(&name, var.ty().clone(), None, Span::NONE)
        })
        .collect()
}

/// The body shared by promotion wrappers and thunks: spill the receiver,
/// walk to the embedded field holding the method, and tail-call it.
fn build_wrapper(
    prog: &Program,
    func: &Arc<Function>,
    recv: &Type,
    sel: &MethodSelection,
) -> Result<FunctionBody> {
    let mut state = FnState::new(func.clone());
    let params = create_params(&mut state);
    let Some((recv_param, args)) = params.split_first() else {
        invariant_bail!(state.name(), "wrapper has no receiver parameter");
    };

    let spill = state.add_local(recv.clone(), "recv", Span::NONE);
    state.emit_store(prog, spill.clone(), recv_param.clone(), Span::NONE)?;
    let mut v = spill;
    if recv.is_pointer() {
        v = state.emit_load(v, Span::NONE);
    }
    // v addresses the receiver: the *A parameter, or the spilled A.
    v = state.emit_implicit_selections(v, sel.path(), Span::NONE)?;

    let method = &sel.obj;
    let Some(method_recv) = method.recv().map(|r| r.ty().clone()) else {
        invariant_bail!(state.name(), "{} is not a method", method.full_name());
    };

    let call = if method_recv.is_interface() {
        let iface = state.emit_load(v, Span::NONE);
        let index = sel.index.last().copied().unwrap_or_default();
        CallCommon::invoke(iface, method.clone(), index, args.to_vec())
    } else {
        if !method_recv.is_pointer() {
            v = state.emit_load(v, Span::NONE);
        }
        let callee = prog.declared_func(method);
        let mut call_args = Vec::with_capacity(args.len() + 1);
        call_args.push(v);
        call_args.extend(args.iter().cloned());
        CallCommon::call(Value::Function(callee), call_args)
    };
    state.emit_tail_call(call)?;
    state.finish(prog)
}

/// A closure body whose receiver is its only free variable.
fn build_bound(prog: &Program, func: &Arc<Function>, method: &Object) -> Result<FunctionBody> {
    let mut state = FnState::new(func.clone());
    let Some(recv_ty) = method.recv().map(|r| r.ty().clone()) else {
        invariant_bail!(state.name(), "{} is not a method", method.full_name());
    };
    let recv = Value::Local(state.body.add_free_var("recv", recv_ty.clone(), Span::NONE));
    let args = create_params(&mut state);

    let call = if recv_ty.is_interface() {
        let index = recv_ty
            .as_interface()
            .and_then(|iface| iface.method_index(&method.id()));
        let Some(index) = index else {
            invariant_bail!(state.name(), "{recv_ty} has no method {}", method.name());
        };
        CallCommon::invoke(recv, method.clone(), index, args)
    } else {
        let callee = prog.declared_func(method);
        let mut call_args = Vec::with_capacity(args.len() + 1);
        call_args.push(recv);
        call_args.extend(args);
        CallCommon::call(Value::Function(callee), call_args)
    };
    state.emit_tail_call(call)?;
    state.finish(prog)
}
