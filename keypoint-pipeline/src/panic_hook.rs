use std::{
    backtrace::Backtrace,
    panic::{PanicHookInfo, take_hook},
    thread,
};

/// Installs a global panic hook that logs panics via `tracing` before the
/// previously installed hook runs.
///
/// In the worker, stdout is the protocol pipe, so this is the only place a
/// panic message reliably shows up next to the rest of the worker's logs.
pub fn install() {
    let previous_hook = take_hook();

    std::panic::set_hook(Box::new(move |panic_info: &PanicHookInfo<'_>| {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let panic_record = format_panic_record(panic_info);
            tracing::error!(target: "keypoint_pipeline::panic", "{panic_record}");
        }));

        previous_hook(panic_info);
    }));
}

fn format_panic_record(panic_info: &PanicHookInfo<'_>) -> String {
    let payload = panic_payload_to_string(panic_info);
    let location = panic_info
        .location()
        .map(|loc| format!("{}:{}:{}", loc.file(), loc.line(), loc.column()))
        .unwrap_or_else(|| "<unknown>".to_string());

    let thread_name = thread::current()
        .name()
        .map(str::to_string)
        .unwrap_or_else(|| "<unnamed>".to_string());

    let backtrace = Backtrace::capture();

    format!("PANIC thread={thread_name} location={location} payload={payload}\nBacktrace:\n{backtrace}")
}

pub(crate) fn panic_payload_to_string(panic_info: &PanicHookInfo<'_>) -> String {
    payload_to_string(panic_info.payload())
        .unwrap_or_else(|| panic_info.to_string())
}

/// Message carried by a panic payload, if it is a string.
pub(crate) fn payload_to_string(payload: &(dyn std::any::Any + Send)) -> Option<String> {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return Some((*s).to_string());
    }
    payload.downcast_ref::<String>().cloned()
}
