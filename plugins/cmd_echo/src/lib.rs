use tgbot_command_abi::{
    RawCommandDescriptor, RawEvent, RawHostApi, SPLIT_NONE, export_command, guard,
};

unsafe extern "C" fn handle_echo(host: *const RawHostApi, event: *const RawEvent) -> bool {
    // SAFETY: pointers come straight from the host.
    unsafe {
        guard(host, event, |host, event| {
            let args = event.args();
            let text = if args.is_empty() {
                "(nothing to echo)".to_string()
            } else {
                args.join(" ")
            };
            host.reply(&text)
        })
    }
}

fn register(name: &str, out: &mut RawCommandDescriptor) -> bool {
    if name != "echo" {
        return false;
    }
    out.name = c"echo".as_ptr();
    out.description = c"Echo the message back".as_ptr();
    out.args.enabled = true;
    out.args.split = SPLIT_NONE;
    out.handler = Some(handle_echo);
    true
}

export_command!(register);
