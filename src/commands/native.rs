//! Shared-library backend for [`DynamicUnitLoader`], built on `libloading`.
//!
//! The handler of a native command keeps its library mapped through an
//! `Arc`, so closing a unit while an invocation is still running only
//! unmaps the code once that invocation returns.

#![allow(unsafe_code)]

use super::descriptor::{
    AcceptedCounts, ArgContract, CommandContext, CommandDescriptor, CommandFlags, CommandHandler,
    SplitRule,
};
use super::loader::{DynamicUnitLoader, EntryFn, UnitHandle};
use crate::channels::ReplySink;
use crate::event::InboundEvent;
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use libloading::{Library, Symbol};
use std::any::Any;
use std::ffi::{CStr, CString, c_char, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::ptr;
use std::sync::Arc;
use tgbot_command_abi::{
    ENTRY_SYMBOL, FLAG_HIDDEN, FLAG_RESTRICTED, LoadCmdFn, RawCommandDescriptor, RawEvent,
    RawHandlerFn, RawHostApi,
};
use tokio::runtime::Handle;
use tracing::warn;

/// Opens `cmd_*` shared libraries from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeUnitLoader;

impl DynamicUnitLoader for NativeUnitLoader {
    fn open(&self, path: &Path) -> Result<UnitHandle> {
        // SAFETY: Loading a unit runs its initialisers; units are trusted by
        // being placed in the modules directory.
        let lib = unsafe { Library::new(path) }
            .with_context(|| format!("failed to open unit {}", path.display()))?;
        Ok(UnitHandle::new(path, Arc::new(lib)))
    }

    fn resolve_entry(&self, unit: &UnitHandle) -> Result<EntryFn> {
        let lib = unit.downcast::<Library>().ok_or_else(|| {
            anyhow!(
                "{} was not opened by the native loader",
                unit.path().display()
            )
        })?;
        // SAFETY: Symbol type is the `loadcmd` signature shared with units
        // through the ABI crate. The copied fn pointer stays valid while
        // `lib` is alive, which the returned closure guarantees.
        let entry: LoadCmdFn = unsafe {
            let symbol: Symbol<LoadCmdFn> = lib.get(ENTRY_SYMBOL).with_context(|| {
                format!("missing entry symbol `loadcmd` in {}", unit.path().display())
            })?;
            *symbol
        };
        let keep_mapped: Arc<dyn Any + Send + Sync> = lib;
        Ok(Arc::new(move |name: &str| {
            call_entry(entry, name, &keep_mapped)
        }))
    }

    fn close(&self, unit: UnitHandle) {
        drop(unit);
    }
}

fn call_entry(
    entry: LoadCmdFn,
    name: &str,
    keep_mapped: &Arc<dyn Any + Send + Sync>,
) -> Result<Option<CommandDescriptor>> {
    let c_name = CString::new(name).context("command name contains a nul byte")?;
    let mut raw = RawCommandDescriptor::empty();
    // SAFETY: Both pointers outlive the call; the unit only writes `raw`.
    let accepted = unsafe { entry(c_name.as_ptr(), &mut raw) };
    if !accepted {
        return Ok(None);
    }
    descriptor_from_raw(&raw, keep_mapped).map(Some)
}

/// Copies a filled descriptor into owned form.
fn descriptor_from_raw(
    raw: &RawCommandDescriptor,
    keep_mapped: &Arc<dyn Any + Send + Sync>,
) -> Result<CommandDescriptor> {
    // SAFETY: Non-null strings point into the unit, which is still mapped.
    let (name, description, usage) = unsafe {
        (
            owned_str(raw.name),
            owned_str(raw.description),
            owned_str(raw.args.usage),
        )
    };
    let name = name.context("descriptor name is null")?;
    let description = description.context("descriptor description is null")?;
    let func = raw.handler.context("descriptor has no handler")?;
    let split = SplitRule::from_raw(raw.args.split)
        .ok_or_else(|| anyhow!("unknown split rule {}", raw.args.split))?;

    Ok(CommandDescriptor {
        name,
        description,
        flags: CommandFlags {
            restricted: raw.flags & FLAG_RESTRICTED != 0,
            hidden: raw.flags & FLAG_HIDDEN != 0,
        },
        args: ArgContract {
            enabled: raw.args.enabled,
            counts: AcceptedCounts::from_mask(raw.args.counts_mask),
            split,
            usage,
        },
        handler: Arc::new(NativeHandler {
            mapped: Arc::clone(keep_mapped),
            func,
        }),
    })
}

unsafe fn owned_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: Checked for null; the caller vouches for termination.
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

struct NativeHandler {
    mapped: Arc<dyn Any + Send + Sync>,
    func: RawHandlerFn,
}

#[async_trait]
impl CommandHandler for NativeHandler {
    async fn handle(&self, ctx: CommandContext, event: InboundEvent) -> Result<()> {
        let mapped = Arc::clone(&self.mapped);
        let func = self.func;
        let bridge = ReplyBridge {
            runtime: Handle::current(),
            sink: Arc::clone(&ctx.sink),
            event,
        };
        let args = ctx.args;

        let ok = tokio::task::spawn_blocking(move || {
            let _mapped = mapped;
            invoke(func, &bridge, &args)
        })
        .await
        .context("native handler thread failed")??;

        if !ok {
            bail!("handler of '{}' reported failure", ctx.command);
        }
        Ok(())
    }
}

/// Context behind `RawHostApi::ctx` while a native handler runs.
struct ReplyBridge {
    runtime: Handle,
    sink: Arc<dyn ReplySink>,
    event: InboundEvent,
}

impl ReplyBridge {
    fn send(&self, text: &str) -> bool {
        match self.runtime.block_on(self.sink.reply(&self.event, text)) {
            Ok(()) => true,
            Err(e) => {
                warn!(chat = self.event.chat_id, "reply from native handler failed: {e:#}");
                false
            }
        }
    }
}

unsafe extern "C" fn reply_trampoline(ctx: *mut c_void, text: *const c_char) -> bool {
    if ctx.is_null() || text.is_null() {
        return false;
    }
    // SAFETY: `ctx` is the `ReplyBridge` that `invoke` keeps alive for the
    // whole handler call; `text` was checked for null.
    let (bridge, text) = unsafe {
        (
            &*ctx.cast::<ReplyBridge>(),
            CStr::from_ptr(text).to_string_lossy().into_owned(),
        )
    };
    catch_unwind(AssertUnwindSafe(|| bridge.send(&text))).unwrap_or(false)
}

/// Runs a native handler on the current (blocking) thread.
fn invoke(func: RawHandlerFn, bridge: &ReplyBridge, args: &[String]) -> Result<bool> {
    let event = &bridge.event;
    let text = event
        .text
        .as_deref()
        .map(CString::new)
        .transpose()
        .context("message text contains a nul byte")?;
    let c_args = args
        .iter()
        .map(|a| CString::new(a.as_str()))
        .collect::<Result<Vec<_>, _>>()
        .context("argument contains a nul byte")?;
    let argv: Vec<*const c_char> = c_args.iter().map(|a| a.as_ptr()).collect();

    let raw_event = RawEvent {
        chat_id: event.chat_id,
        message_id: event.message_id,
        has_sender: event.sender.is_some(),
        sender_id: event.sender.as_ref().map_or(0, |s| s.id),
        text: text.as_ref().map_or(ptr::null(), |t| t.as_ptr()),
        argv: if argv.is_empty() {
            ptr::null()
        } else {
            argv.as_ptr()
        },
        argc: argv.len(),
    };
    let host = RawHostApi {
        ctx: ptr::from_ref(bridge).cast_mut().cast::<c_void>(),
        reply: Some(reply_trampoline),
    };

    // SAFETY: Every pointer in `host` and `raw_event` borrows locals that
    // outlive the call.
    Ok(unsafe { func(&host, &raw_event) })
}
