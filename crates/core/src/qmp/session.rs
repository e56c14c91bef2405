//! QMP Session: greeting, capability handshake, command dispatch.

use crate::facade::{Completion, EmulatorFacade, MouseButton};
use crate::gate::{AsyncRequestGate, RequestKind};
use crate::json::{find_field, FieldValue};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use emudbg_common::keycodes::{self, KeyId};
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

/// Commands this stub advertises via `query-commands`.
const KNOWN_COMMANDS: &[&str] = &[
    "qmp_capabilities",
    "query-commands",
    "query-status",
    "send-key",
    "input-send-event",
    "memdump",
    "screendump",
    "savestate",
    "loadstate",
    "stop",
    "cont",
    "system_reset",
    "quit",
    "system_powerdown",
];

/// Memory dump size cap: 16 MiB.
const MEMDUMP_SIZE_CAP: i64 = 16 * 1024 * 1024;

const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(5);
const SAVE_LOAD_TIMEOUT: Duration = Duration::from_secs(30);
const PAUSE_RESUME_TIMEOUT: Duration = Duration::from_secs(1);

/// Per-connection QMP session. One instance per accepted client.
pub struct QmpSession {
    greeted: bool,
    capabilities_negotiated: bool,
}

impl Default for QmpSession {
    fn default() -> Self {
        Self::new()
    }
}

impl QmpSession {
    pub fn new() -> Self {
        Self {
            greeted: false,
            capabilities_negotiated: false,
        }
    }

    pub fn capabilities_negotiated(&self) -> bool {
        self.capabilities_negotiated
    }

    /// Build the greeting line, sent once immediately after accept.
    pub fn greeting(&mut self) -> Vec<u8> {
        self.greeted = true;
        line(&json!({
            "QMP": {
                "version": {
                    "qemu": {"major": 0, "minor": 1, "micro": 0},
                    "package": "emudbg"
                },
                "capabilities": ["oob"]
            }
        }))
    }

    /// Dispatch one complete JSON command object (already split out by the
    /// [`crate::json::JsonExtractor`]) and return the reply line to write.
    pub fn dispatch(
        &mut self,
        obj: &[u8],
        facade: &dyn EmulatorFacade,
        gate: &AsyncRequestGate,
    ) -> Vec<u8> {
        let command = match find_field(obj, "execute") {
            Some(FieldValue::Str(s)) => s,
            _ => return error_reply("GenericError", "Missing or invalid 'execute' field"),
        };

        if !self.capabilities_negotiated && command != "qmp_capabilities" {
            return error_reply("GenericError", "Capabilities negotiation not complete");
        }

        let args = match find_field(obj, "arguments") {
            Some(FieldValue::Object(bytes)) => bytes,
            _ => Vec::new(),
        };

        match command.as_str() {
            "qmp_capabilities" => {
                self.capabilities_negotiated = true;
                success(json!({}))
            }
            "query-commands" => success(Value::Array(
                KNOWN_COMMANDS.iter().map(|n| json!({"name": n})).collect(),
            )),
            "query-status" => {
                let paused = facade.is_paused();
                success(json!({
                    "status": if paused { "paused" } else { "running" },
                    "running": !paused,
                }))
            }
            "send-key" => handle_send_key(&args, facade),
            "input-send-event" => handle_input_send_event(&args, facade),
            "memdump" => handle_memdump(&args, facade),
            "screendump" => handle_screendump(&args, facade, gate),
            "savestate" => handle_savestate(&args, gate),
            "loadstate" => handle_loadstate(&args, gate),
            "stop" => handle_stop(facade, gate),
            "cont" => handle_cont(facade, gate),
            "system_reset" => handle_system_reset(&args, facade, gate),
            "quit" | "system_powerdown" => success(json!({})),
            other => error_reply(
                "CommandNotFound",
                format!("The command {other} has not been found"),
            ),
        }
    }
}

fn line(value: &Value) -> Vec<u8> {
    let mut out = value.to_string().into_bytes();
    out.extend_from_slice(b"\r\n");
    out
}

fn success(value: Value) -> Vec<u8> {
    line(&json!({"return": value}))
}

fn error_reply(class: &str, desc: impl Into<String>) -> Vec<u8> {
    line(&json!({"error": {"class": class, "desc": desc.into()}}))
}

fn key_id_from_object(obj: &[u8]) -> Option<KeyId> {
    match find_field(obj, "data") {
        Some(FieldValue::Str(name)) => Some(keycodes::lookup(&name)),
        _ => None,
    }
}

fn handle_send_key(args: &[u8], facade: &dyn EmulatorFacade) -> Vec<u8> {
    let keys = match find_field(args, "keys") {
        Some(FieldValue::Array(items)) => items,
        _ => return error_reply("GenericError", "Invalid parameter type for 'keys'"),
    };
    if keys.is_empty() {
        return error_reply("GenericError", "Parameter 'keys' is empty");
    }
    let hold_time = match find_field(args, "hold-time") {
        Some(FieldValue::Int(ms)) => ms.max(0) as u64,
        _ => 100,
    };

    let pressed: Vec<KeyId> = keys
        .iter()
        .filter_map(|k| key_id_from_object(k))
        .filter(|id| {
            let known = *id != KeyId::None;
            if !known {
                warn!("send-key: unknown qcode, ignoring");
            }
            known
        })
        .collect();

    for key in &pressed {
        facade.add_key(*key, true);
    }
    std::thread::sleep(Duration::from_millis(hold_time));
    for key in pressed.iter().rev() {
        facade.add_key(*key, false);
    }

    success(json!({}))
}

fn handle_input_send_event(args: &[u8], facade: &dyn EmulatorFacade) -> Vec<u8> {
    let events = match find_field(args, "events") {
        Some(FieldValue::Array(items)) => items,
        _ => return error_reply("GenericError", "Invalid parameter type for 'events'"),
    };

    let mut dx_accum = 0i32;
    let mut dy_accum = 0i32;
    let mut saw_rel = false;

    for event in &events {
        let event_type = match find_field(event, "type") {
            Some(FieldValue::Str(t)) => t,
            _ => continue,
        };
        let data = match find_field(event, "data") {
            Some(FieldValue::Object(d)) => d,
            _ => continue,
        };
        match event_type.as_str() {
            "key" => {
                let down = matches!(find_field(&data, "down"), Some(FieldValue::Bool(true)));
                if let Some(FieldValue::Object(key_obj)) = find_field(&data, "key") {
                    if let Some(id) = key_id_from_object(&key_obj) {
                        if id != KeyId::None {
                            facade.add_key(id, down);
                        } else {
                            warn!("input-send-event: unknown qcode, ignoring");
                        }
                    }
                }
            }
            "rel" => {
                let axis = match find_field(&data, "axis") {
                    Some(FieldValue::Str(a)) => a,
                    _ => continue,
                };
                let value = match find_field(&data, "value") {
                    Some(FieldValue::Int(v)) => v as i32,
                    _ => continue,
                };
                saw_rel = true;
                match axis.as_str() {
                    "x" => dx_accum += value,
                    "y" => dy_accum += value,
                    _ => {}
                }
            }
            "btn" => {
                let button = match find_field(&data, "button") {
                    Some(FieldValue::Str(b)) => b,
                    _ => continue,
                };
                let down = matches!(find_field(&data, "down"), Some(FieldValue::Bool(true)));
                let button = match button.as_str() {
                    "left" => MouseButton::Left,
                    "right" => MouseButton::Right,
                    "middle" => MouseButton::Middle,
                    other => {
                        debug!(button = other, "input-send-event: unknown mouse button, ignoring");
                        continue;
                    }
                };
                if down {
                    facade.button_pressed(button);
                } else {
                    facade.button_released(button);
                }
            }
            _ => {}
        }
    }

    if saw_rel {
        facade.cursor_moved(dx_accum, dy_accum, true);
    }

    success(json!({}))
}

fn handle_memdump(args: &[u8], facade: &dyn EmulatorFacade) -> Vec<u8> {
    let address = match find_field(args, "address") {
        Some(FieldValue::Int(a)) => a,
        _ => return error_reply("GenericError", "Missing parameter 'address'"),
    };
    let size = match find_field(args, "size") {
        Some(FieldValue::Int(s)) => s,
        _ => return error_reply("GenericError", "Missing parameter 'size'"),
    };
    if address < 0 || size < 0 {
        return error_reply("GenericError", "'address' and 'size' must not be negative");
    }
    if size > MEMDUMP_SIZE_CAP {
        return error_reply(
            "GenericError",
            format!("size exceeds maximum of {MEMDUMP_SIZE_CAP} bytes"),
        );
    }
    let file = match find_field(args, "file") {
        Some(FieldValue::Str(f)) => Some(f),
        _ => None,
    };

    match file {
        Some(path) => {
            if facade.save_memory_bin(&path, address as u32, size as u32) {
                success(json!({"file": path, "size": size}))
            } else {
                error_reply("GenericError", "failed to write memory dump to file")
            }
        }
        None => {
            let bytes: Vec<u8> = (0..size as u32)
                .map(|offset| facade.read_byte(address as u32 + offset))
                .collect();
            success(json!({"data": BASE64.encode(&bytes), "size": size}))
        }
    }
}

fn handle_screendump(args: &[u8], facade: &dyn EmulatorFacade, gate: &AsyncRequestGate) -> Vec<u8> {
    let file = match find_field(args, "file") {
        Some(FieldValue::Str(f)) => Some(f),
        _ => None,
    };

    if !gate.submit(RequestKind::Screenshot, None) {
        return error_reply("GenericError", "a request is already in progress");
    }
    if let Err(message) = gate.await_result(SCREENSHOT_TIMEOUT) {
        return error_reply("GenericError", message);
    }

    let path = facade.get_last_screenshot_path();
    let bytes = match std::fs::read(&path) {
        Ok(b) => b,
        Err(e) => return error_reply("GenericError", format!("failed to read screenshot: {e}")),
    };
    facade.clear_last_screenshot_path();

    match file {
        Some(dest) => match std::fs::copy(&path, &dest) {
            Ok(_) => success(json!({"file": dest, "size": bytes.len(), "format": "png"})),
            Err(e) => error_reply("GenericError", format!("failed to copy screenshot: {e}")),
        },
        None => success(json!({
            "data": BASE64.encode(&bytes),
            "size": bytes.len(),
            "format": "png",
        })),
    }
}

fn handle_savestate(args: &[u8], gate: &AsyncRequestGate) -> Vec<u8> {
    let file = match find_field(args, "file") {
        Some(FieldValue::Str(f)) => f,
        _ => return error_reply("GenericError", "Missing parameter 'file'"),
    };
    if !gate.submit(RequestKind::Save, Some(file.clone())) {
        return error_reply("GenericError", "a request is already in progress");
    }
    match gate.await_result(SAVE_LOAD_TIMEOUT) {
        Ok(()) => success(json!({"file": file})),
        Err(message) => error_reply("GenericError", message),
    }
}

fn handle_loadstate(args: &[u8], gate: &AsyncRequestGate) -> Vec<u8> {
    let file = match find_field(args, "file") {
        Some(FieldValue::Str(f)) => f,
        _ => return error_reply("GenericError", "Missing parameter 'file'"),
    };
    if !Path::new(&file).exists() {
        return error_reply("GenericError", format!("file '{file}' does not exist"));
    }
    if !gate.submit(RequestKind::Load, Some(file.clone())) {
        return error_reply("GenericError", "a request is already in progress");
    }
    match gate.await_result(SAVE_LOAD_TIMEOUT) {
        Ok(()) => success(json!({"file": file})),
        Err(message) => error_reply("GenericError", message),
    }
}

fn handle_stop(facade: &dyn EmulatorFacade, gate: &AsyncRequestGate) -> Vec<u8> {
    if facade.is_paused() {
        return success(json!({}));
    }
    if !gate.submit(RequestKind::Pause, None) {
        return error_reply("GenericError", "a request is already in progress");
    }
    match gate.await_result(PAUSE_RESUME_TIMEOUT) {
        Ok(()) => success(json!({})),
        Err(message) => error_reply("GenericError", message),
    }
}

fn handle_cont(facade: &dyn EmulatorFacade, gate: &AsyncRequestGate) -> Vec<u8> {
    if !facade.is_paused() {
        return success(json!({}));
    }
    if !gate.submit(RequestKind::Resume, None) {
        return error_reply("GenericError", "a request is already in progress");
    }
    match gate.await_result(PAUSE_RESUME_TIMEOUT) {
        Ok(()) => success(json!({})),
        Err(message) => error_reply("GenericError", message),
    }
}

fn handle_system_reset(
    args: &[u8],
    _facade: &dyn EmulatorFacade,
    gate: &AsyncRequestGate,
) -> Vec<u8> {
    let dos_only = matches!(find_field(args, "dos_only"), Some(FieldValue::Bool(true)));
    let argument = if dos_only { "dos_only" } else { "full" };
    gate.submit(RequestKind::Reset, Some(argument.to_string()));
    success(json!({}))
}

/// Exposed so [`crate::poll`] can poll an in-flight save/load completion via
/// the facade's `Completion` type without duplicating the match here.
pub fn completion_error_message(completion: Completion) -> Option<String> {
    match completion {
        Completion::Pending => Some("timed out waiting for completion".to_string()),
        Completion::Success => None,
        Completion::Error(message) => Some(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::SimFacade;

    fn negotiated() -> QmpSession {
        let mut session = QmpSession::new();
        session.greeting();
        session.capabilities_negotiated = true;
        session
    }

    #[test]
    fn greeting_contains_qmp_and_oob_capability() {
        let mut session = QmpSession::new();
        let greeting = String::from_utf8(session.greeting()).unwrap();
        assert!(greeting.contains("\"QMP\""));
        assert!(greeting.contains("\"oob\""));
        assert!(greeting.ends_with("\r\n"));
    }

    #[test]
    fn commands_before_negotiation_are_rejected() {
        let mut session = QmpSession::new();
        let facade = SimFacade::new(0x10);
        let gate = AsyncRequestGate::new();
        let reply = session.dispatch(br#"{"execute":"query-status"}"#, &facade, &gate);
        let text = String::from_utf8(reply).unwrap();
        assert!(text.contains("GenericError"));
        assert!(text.contains("Capabilities negotiation"));
    }

    #[test]
    fn capabilities_negotiation_flips_flag() {
        let mut session = QmpSession::new();
        let facade = SimFacade::new(0x10);
        let gate = AsyncRequestGate::new();
        let reply = session.dispatch(br#"{"execute":"qmp_capabilities"}"#, &facade, &gate);
        assert!(String::from_utf8(reply).unwrap().contains("\"return\":{}"));
        assert!(session.capabilities_negotiated());
    }

    #[test]
    fn unknown_command_reports_command_not_found() {
        let mut session = negotiated();
        let facade = SimFacade::new(0x10);
        let gate = AsyncRequestGate::new();
        let reply = session.dispatch(br#"{"execute":"bogus"}"#, &facade, &gate);
        assert!(String::from_utf8(reply).unwrap().contains("CommandNotFound"));
    }

    #[test]
    fn send_key_ctrl_alt_delete_presses_then_releases_in_reverse() {
        let mut session = negotiated();
        let facade = SimFacade::new(0x10);
        let gate = AsyncRequestGate::new();
        let cmd = br#"{"execute":"send-key","arguments":{"keys":[{"type":"qcode","data":"ctrl"},{"type":"qcode","data":"alt"},{"type":"qcode","data":"delete"}],"hold-time":1}}"#;
        let reply = session.dispatch(cmd, &facade, &gate);
        assert!(String::from_utf8(reply).unwrap().contains("\"return\":{}"));
        let log = facade.keyboard_log();
        assert_eq!(
            log,
            vec![
                (KeyId::Ctrl, true),
                (KeyId::Alt, true),
                (KeyId::Delete, true),
                (KeyId::Delete, false),
                (KeyId::Alt, false),
                (KeyId::Ctrl, false),
            ]
        );
    }

    #[test]
    fn memdump_without_file_returns_base64() {
        let mut session = negotiated();
        let facade = SimFacade::new(0x10);
        let gate = AsyncRequestGate::new();
        facade.write_byte(0, 0x00);
        facade.write_byte(1, 0x01);
        facade.write_byte(2, 0x02);
        facade.write_byte(3, 0x03);
        let reply = session.dispatch(
            br#"{"execute":"memdump","arguments":{"address":0,"size":4}}"#,
            &facade,
            &gate,
        );
        let text = String::from_utf8(reply).unwrap();
        assert!(text.contains("\"data\":\"AAECAw==\""));
        assert!(text.contains("\"size\":4"));
    }

    #[test]
    fn memdump_with_file_writes_bytes_to_disk() {
        let mut session = negotiated();
        let facade = SimFacade::new(0x10);
        let gate = AsyncRequestGate::new();
        facade.write_byte(0, 0xde);
        facade.write_byte(1, 0xad);
        let scratch = tempfile::NamedTempFile::new().unwrap();
        let path = scratch.path().to_str().unwrap();
        let cmd = format!(r#"{{"execute":"memdump","arguments":{{"address":0,"size":2,"file":"{path}"}}}}"#);
        let reply = session.dispatch(cmd.as_bytes(), &facade, &gate);
        assert!(String::from_utf8(reply).unwrap().contains("\"size\":2"));
        assert_eq!(std::fs::read(scratch.path()).unwrap(), vec![0xde, 0xad]);
    }

    #[test]
    fn loadstate_with_existing_file_completes_via_gate() {
        let mut session = negotiated();
        let facade = SimFacade::new(0x10);
        let gate = AsyncRequestGate::new();
        let scratch = tempfile::NamedTempFile::new().unwrap();
        let path = scratch.path().to_str().unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                while gate.take_pending().is_none() {
                    std::thread::sleep(Duration::from_millis(1));
                }
                facade.complete_save_load(Ok(()));
                gate.complete(None);
            });
            let cmd = format!(r#"{{"execute":"loadstate","arguments":{{"file":"{path}"}}}}"#);
            let reply = session.dispatch(cmd.as_bytes(), &facade, &gate);
            assert!(String::from_utf8(reply).unwrap().contains("\"return\""));
        });
    }

    #[test]
    fn loadstate_missing_file_is_rejected_before_touching_gate() {
        let mut session = negotiated();
        let facade = SimFacade::new(0x10);
        let gate = AsyncRequestGate::new();
        let reply = session.dispatch(
            br#"{"execute":"loadstate","arguments":{"file":"/no/such/path.sav"}}"#,
            &facade,
            &gate,
        );
        assert!(String::from_utf8(reply).unwrap().contains("GenericError"));
        assert!(gate.is_idle());
    }

    #[test]
    fn memdump_negative_size_is_rejected() {
        let mut session = negotiated();
        let facade = SimFacade::new(0x10);
        let gate = AsyncRequestGate::new();
        let reply = session.dispatch(
            br#"{"execute":"memdump","arguments":{"address":0,"size":-1}}"#,
            &facade,
            &gate,
        );
        assert!(String::from_utf8(reply).unwrap().contains("GenericError"));
    }

    #[test]
    fn memdump_negative_address_is_rejected() {
        let mut session = negotiated();
        let facade = SimFacade::new(0x10);
        let gate = AsyncRequestGate::new();
        let reply = session.dispatch(
            br#"{"execute":"memdump","arguments":{"address":-1,"size":4}}"#,
            &facade,
            &gate,
        );
        assert!(String::from_utf8(reply).unwrap().contains("GenericError"));
    }

    #[test]
    fn memdump_over_cap_is_rejected() {
        let mut session = negotiated();
        let facade = SimFacade::new(0x10);
        let gate = AsyncRequestGate::new();
        let reply = session.dispatch(
            br#"{"execute":"memdump","arguments":{"address":0,"size":20000000}}"#,
            &facade,
            &gate,
        );
        assert!(String::from_utf8(reply).unwrap().contains("GenericError"));
    }

    #[test]
    fn query_status_reflects_paused_state() {
        let mut session = negotiated();
        let facade = SimFacade::new(0x10);
        let gate = AsyncRequestGate::new();
        facade.request_pause();
        let reply = session.dispatch(br#"{"execute":"query-status"}"#, &facade, &gate);
        let text = String::from_utf8(reply).unwrap();
        assert!(text.contains("\"status\":\"paused\""));
        assert!(text.contains("\"running\":false"));
    }

    #[test]
    fn stop_is_idempotent_when_already_paused() {
        let mut session = negotiated();
        let facade = SimFacade::new(0x10);
        let gate = AsyncRequestGate::new();
        facade.request_pause();
        let reply = session.dispatch(br#"{"execute":"stop"}"#, &facade, &gate);
        assert!(String::from_utf8(reply).unwrap().contains("\"return\":{}"));
        assert!(gate.is_idle());
    }
}
