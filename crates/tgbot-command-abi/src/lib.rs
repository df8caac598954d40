//! C ABI between the bot host and command units.
//!
//! A command unit is a `cdylib` named `<prefix>cmd_<name>.<ext>` exporting one
//! symbol, `loadcmd`. The host calls it with the command name derived from the
//! file name and a zeroed [`RawCommandDescriptor`]; the unit fills the
//! descriptor and returns `true`, or returns `false` to refuse loading.
//!
//! The host copies the descriptor's strings right after the call returns, so
//! they must stay valid until then; `c"..."` literals always do. The handler
//! function pointer is only called while the library stays mapped.

use std::ffi::{CStr, c_char, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Name of the entry symbol, nul-terminated for `dlsym`.
pub const ENTRY_SYMBOL: &[u8] = b"loadcmd\0";

/// File-name marker between the platform library prefix and the command name.
pub const UNIT_MARKER: &str = "cmd_";

/// Only the owner or whitelisted users may run the command.
pub const FLAG_RESTRICTED: u32 = 1 << 0;
/// Leave the command out of the published command list.
pub const FLAG_HIDDEN: u32 = 1 << 1;

pub const SPLIT_NONE: u8 = 0;
pub const SPLIT_WHITESPACE: u8 = 1;
pub const SPLIT_COMMA: u8 = 2;
pub const SPLIT_NEWLINE: u8 = 3;

/// Argument contract. Bit `n` of `counts_mask` accepts exactly `n` arguments;
/// a zero mask disables the count check.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawArgContract {
    pub enabled: bool,
    pub counts_mask: u32,
    pub split: u8,
    pub usage: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawCommandDescriptor {
    pub name: *const c_char,
    pub description: *const c_char,
    pub flags: u32,
    pub args: RawArgContract,
    pub handler: Option<RawHandlerFn>,
}

impl RawCommandDescriptor {
    pub const fn empty() -> Self {
        Self {
            name: std::ptr::null(),
            description: std::ptr::null(),
            flags: 0,
            args: RawArgContract {
                enabled: false,
                counts_mask: 0,
                split: SPLIT_NONE,
                usage: std::ptr::null(),
            },
            handler: None,
        }
    }
}

impl Default for RawCommandDescriptor {
    fn default() -> Self {
        Self::empty()
    }
}

/// Inbound event as seen by a unit. Pointers are valid for the duration of
/// the handler call only.
#[repr(C)]
#[derive(Debug)]
pub struct RawEvent {
    pub chat_id: i64,
    pub message_id: i64,
    pub has_sender: bool,
    pub sender_id: i64,
    pub text: *const c_char,
    pub argv: *const *const c_char,
    pub argc: usize,
}

/// Callbacks into the host.
#[repr(C)]
#[derive(Debug)]
pub struct RawHostApi {
    pub ctx: *mut c_void,
    pub reply: Option<unsafe extern "C" fn(ctx: *mut c_void, text: *const c_char) -> bool>,
}

pub type RawHandlerFn =
    unsafe extern "C" fn(host: *const RawHostApi, event: *const RawEvent) -> bool;

pub type LoadCmdFn =
    unsafe extern "C" fn(command_name: *const c_char, out: *mut RawCommandDescriptor) -> bool;

/// Safe view of the host callbacks handed to a handler.
pub struct Host<'a> {
    raw: &'a RawHostApi,
}

impl Host<'_> {
    /// Reply to the event being handled. Returns `false` if the host could
    /// not deliver the message or the text contains a nul byte.
    pub fn reply(&self, text: &str) -> bool {
        let Some(reply) = self.raw.reply else {
            return false;
        };
        let Ok(text) = std::ffi::CString::new(text) else {
            return false;
        };
        // SAFETY: the host guarantees `ctx` and `reply` stay valid for the
        // duration of the handler call that produced this view.
        unsafe { reply(self.raw.ctx, text.as_ptr()) }
    }
}

/// Safe view of the event handed to a handler.
pub struct Event<'a> {
    raw: &'a RawEvent,
}

impl<'a> Event<'a> {
    pub fn chat_id(&self) -> i64 {
        self.raw.chat_id
    }

    pub fn message_id(&self) -> i64 {
        self.raw.message_id
    }

    pub fn sender_id(&self) -> Option<i64> {
        self.raw.has_sender.then_some(self.raw.sender_id)
    }

    pub fn text(&self) -> Option<&'a str> {
        // SAFETY: non-null text points at a nul-terminated string owned by
        // the host for the duration of the call.
        unsafe { opt_str(self.raw.text) }
    }

    /// Arguments already split by the host according to the contract.
    pub fn args(&self) -> Vec<&'a str> {
        if self.raw.argv.is_null() {
            return Vec::new();
        }
        (0..self.raw.argc)
            .filter_map(|i| {
                // SAFETY: `argv` holds `argc` pointers provided by the host.
                unsafe { opt_str(*self.raw.argv.add(i)) }
            })
            .collect()
    }
}

unsafe fn opt_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: checked for null above; the caller vouches for lifetime.
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Runs a handler body with safe views, turning null pointers and panics
/// into a `false` return instead of unwinding into the host.
///
/// # Safety
/// `host` and `event` must be the pointers the host passed to the handler.
pub unsafe fn guard<F>(host: *const RawHostApi, event: *const RawEvent, body: F) -> bool
where
    F: FnOnce(&Host<'_>, &Event<'_>) -> bool,
{
    if host.is_null() || event.is_null() {
        return false;
    }
    // SAFETY: both pointers were checked for null and come from the host.
    let (host, event) = unsafe { (Host { raw: &*host }, Event { raw: &*event }) };
    catch_unwind(AssertUnwindSafe(|| body(&host, &event))).unwrap_or(false)
}

/// Builds a count mask from the accepted argument counts.
pub const fn counts_mask(counts: &[u32]) -> u32 {
    let mut mask = 0u32;
    let mut i = 0;
    while i < counts.len() {
        if counts[i] < 32 {
            mask |= 1 << counts[i];
        }
        i += 1;
    }
    mask
}

/// Exports `loadcmd` for a unit. The registration function receives the
/// command name chosen by the host and the descriptor to fill:
///
/// ```ignore
/// fn register(name: &str, out: &mut RawCommandDescriptor) -> bool { ... }
/// tgbot_command_abi::export_command!(register);
/// ```
#[macro_export]
macro_rules! export_command {
    ($register:path) => {
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn loadcmd(
            command_name: *const ::std::ffi::c_char,
            out: *mut $crate::RawCommandDescriptor,
        ) -> bool {
            if command_name.is_null() || out.is_null() {
                return false;
            }
            // SAFETY: the host passes a nul-terminated name and a valid,
            // exclusively borrowed descriptor for the duration of the call.
            let (name, out) = unsafe { (::std::ffi::CStr::from_ptr(command_name), &mut *out) };
            let Ok(name) = name.to_str() else {
                return false;
            };
            ::std::panic::catch_unwind(::std::panic::AssertUnwindSafe(|| $register(name, out)))
                .unwrap_or(false)
        }
    };
}
