//! Domain-specific wrappers over the RPC client: navigation, viewport,
//! screencast control, input dispatch, and target management.

use std::sync::{Arc, Mutex};

use serde_json::{Value, json};

use core_events::{BaseKey, ModMask, MouseButton, NormalizedKey};
use core_input::named_key_wire;
use core_rpc::{RpcClient, RpcError};

/// Logical viewport pushed to the browser.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportSpec {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
    pub mobile: bool,
}

/// Screencast start parameters. Starting again with new values supersedes
/// the running capture; no stop is required in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreencastParams {
    pub quality: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub every_nth_frame: u32,
}

/// Browser history position relevant to the toolbar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryState {
    pub can_go_back: bool,
    pub can_go_forward: bool,
}

pub struct BrowserSession {
    client: Arc<RpcClient>,
    session_id: Mutex<Option<String>>,
}

impl BrowserSession {
    pub fn new(client: Arc<RpcClient>) -> Self {
        Self {
            client,
            session_id: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &Arc<RpcClient> {
        &self.client
    }

    pub fn current_session(&self) -> Option<String> {
        self.session_id.lock().expect("session slot poisoned").clone()
    }

    /// Scoped call against the attached target; unscoped before any attach.
    async fn page_call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match self.current_session() {
            Some(sid) => self.client.call_session(&sid, method, params).await,
            None => self.client.call(method, params).await,
        }
    }

    // --- target management -------------------------------------------------

    /// Start receiving `Target.targetCreated` / `targetInfoChanged` events.
    pub async fn set_discover_targets(&self) -> Result<(), RpcError> {
        self.client
            .call("Target.setDiscoverTargets", json!({ "discover": true }))
            .await?;
        Ok(())
    }

    /// Subscribe to download lifecycle events on the browser endpoint.
    pub async fn enable_download_events(&self) -> Result<(), RpcError> {
        self.client
            .call(
                "Browser.setDownloadBehavior",
                json!({ "behavior": "default", "eventsEnabled": true }),
            )
            .await?;
        Ok(())
    }

    pub async fn create_target(&self, url: &str) -> Result<String, RpcError> {
        let result = self
            .client
            .call("Target.createTarget", json!({ "url": url }))
            .await?;
        result
            .get("targetId")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| RpcError::Parse("createTarget without targetId".into()))
    }

    /// Attach to a target with a flattened session and enable the page-level
    /// domains on it. Replaces any previous attachment.
    pub async fn attach(&self, target_id: &str) -> Result<String, RpcError> {
        let result = self
            .client
            .call(
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await?;
        let sid = result
            .get("sessionId")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| RpcError::Parse("attachToTarget without sessionId".into()))?;
        *self.session_id.lock().expect("session slot poisoned") = Some(sid.clone());
        self.page_call("Page.enable", json!({})).await?;
        self.page_call("Runtime.enable", json!({})).await?;
        tracing::debug!(target: "chrome.session", target_id, "attached");
        Ok(sid)
    }

    pub async fn activate_target(&self, target_id: &str) -> Result<(), RpcError> {
        self.client
            .call("Target.activateTarget", json!({ "targetId": target_id }))
            .await?;
        Ok(())
    }

    pub async fn close_target(&self, target_id: &str) -> Result<(), RpcError> {
        self.client
            .call("Target.closeTarget", json!({ "targetId": target_id }))
            .await?;
        Ok(())
    }

    // --- navigation --------------------------------------------------------

    pub async fn navigate(&self, url: &str) -> Result<(), RpcError> {
        self.page_call("Page.navigate", json!({ "url": url })).await?;
        Ok(())
    }

    pub async fn reload(&self, ignore_cache: bool) -> Result<(), RpcError> {
        self.page_call("Page.reload", json!({ "ignoreCache": ignore_cache }))
            .await?;
        Ok(())
    }

    pub async fn stop_loading(&self) -> Result<(), RpcError> {
        self.page_call("Page.stopLoading", json!({})).await?;
        Ok(())
    }

    pub async fn history_state(&self) -> Result<HistoryState, RpcError> {
        let history = self.page_call("Page.getNavigationHistory", json!({})).await?;
        let index = history
            .get("currentIndex")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let count = history
            .get("entries")
            .and_then(Value::as_array)
            .map(|e| e.len() as i64)
            .unwrap_or(0);
        Ok(HistoryState {
            can_go_back: index > 0,
            can_go_forward: index + 1 < count,
        })
    }

    /// Step through history by `delta` entries (negative = back). A step
    /// beyond either end is a no-op.
    pub async fn history_step(&self, delta: i64) -> Result<bool, RpcError> {
        let history = self.page_call("Page.getNavigationHistory", json!({})).await?;
        let index = history
            .get("currentIndex")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let entries = history.get("entries").and_then(Value::as_array);
        let Some(entries) = entries else {
            return Ok(false);
        };
        let target = index + delta;
        if target < 0 || target as usize >= entries.len() {
            return Ok(false);
        }
        let Some(entry_id) = entries[target as usize].get("id").and_then(Value::as_i64) else {
            return Ok(false);
        };
        self.page_call("Page.navigateToHistoryEntry", json!({ "entryId": entry_id }))
            .await?;
        Ok(true)
    }

    // --- viewport and layout -----------------------------------------------

    pub async fn set_viewport(&self, spec: ViewportSpec) -> Result<(), RpcError> {
        self.page_call(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": spec.width,
                "height": spec.height,
                "deviceScaleFactor": spec.device_scale_factor,
                "mobile": spec.mobile,
            }),
        )
        .await?;
        Ok(())
    }

    /// The browser's logical inner viewport (CSS pixels). Callers fall back
    /// to the frame extent when this is unavailable.
    pub async fn layout_viewport(&self) -> Result<(u32, u32), RpcError> {
        let metrics = self.page_call("Page.getLayoutMetrics", json!({})).await?;
        let vp = metrics
            .get("cssLayoutViewport")
            .or_else(|| metrics.get("layoutViewport"))
            .ok_or_else(|| RpcError::Parse("layout metrics without viewport".into()))?;
        let w = vp.get("clientWidth").and_then(Value::as_u64).unwrap_or(0) as u32;
        let h = vp.get("clientHeight").and_then(Value::as_u64).unwrap_or(0) as u32;
        Ok((w, h))
    }

    // --- screencast ---------------------------------------------------------

    pub async fn start_screencast(&self, params: ScreencastParams) -> Result<(), RpcError> {
        self.page_call(
            "Page.startScreencast",
            json!({
                "format": "jpeg",
                "quality": params.quality,
                "maxWidth": params.max_width,
                "maxHeight": params.max_height,
                "everyNthFrame": params.every_nth_frame,
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn stop_screencast(&self) -> Result<(), RpcError> {
        self.page_call("Page.stopScreencast", json!({})).await?;
        Ok(())
    }

    // --- input dispatch ----------------------------------------------------

    /// Dispatch a full key tap as the canonical event sequence: `keyDown`,
    /// then `char` for keys that produce text, then `keyUp`.
    pub async fn send_key_tap(&self, key: &NormalizedKey) -> Result<(), RpcError> {
        for transition in [KeyTransition::Down, KeyTransition::Char, KeyTransition::Up] {
            self.dispatch_key(key, transition).await?;
        }
        Ok(())
    }

    /// One transition of a key tap. A `Char` transition on a key with no
    /// text is a no-op.
    pub async fn dispatch_key(
        &self,
        key: &NormalizedKey,
        transition: KeyTransition,
    ) -> Result<(), RpcError> {
        let Some(payload) = wire_key_payload(key, transition) else {
            return Ok(());
        };
        self.page_call("Input.dispatchKeyEvent", payload).await?;
        Ok(())
    }

    /// Pure text insertion, bypassing key semantics (paste path).
    pub async fn insert_text(&self, text: &str) -> Result<(), RpcError> {
        self.page_call("Input.insertText", json!({ "text": text }))
            .await?;
        Ok(())
    }

    pub async fn mouse_pressed(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        modifiers: u8,
    ) -> Result<(), RpcError> {
        self.dispatch_mouse("mousePressed", x, y, button, modifiers, 0.0, 0.0)
            .await
    }

    pub async fn mouse_released(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        modifiers: u8,
    ) -> Result<(), RpcError> {
        self.dispatch_mouse("mouseReleased", x, y, button, modifiers, 0.0, 0.0)
            .await
    }

    pub async fn mouse_moved(
        &self,
        x: f64,
        y: f64,
        button: MouseButton,
        modifiers: u8,
    ) -> Result<(), RpcError> {
        self.dispatch_mouse("mouseMoved", x, y, button, modifiers, 0.0, 0.0)
            .await
    }

    /// Wheel with pixel deltas, dispatched at the given coordinates.
    pub async fn mouse_wheel(
        &self,
        x: f64,
        y: f64,
        delta_x: f64,
        delta_y: f64,
        modifiers: u8,
    ) -> Result<(), RpcError> {
        self.dispatch_mouse("mouseWheel", x, y, MouseButton::None, modifiers, delta_x, delta_y)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_mouse(
        &self,
        kind: &str,
        x: f64,
        y: f64,
        button: MouseButton,
        modifiers: u8,
        delta_x: f64,
        delta_y: f64,
    ) -> Result<(), RpcError> {
        let mut params = json!({
            "type": kind,
            "x": x,
            "y": y,
            "button": button_name(button),
            "modifiers": modifiers,
        });
        if kind == "mousePressed" || kind == "mouseReleased" {
            params["clickCount"] = json!(1);
        }
        if kind == "mouseWheel" {
            params["deltaX"] = json!(delta_x);
            params["deltaY"] = json!(delta_y);
        }
        self.page_call("Input.dispatchMouseEvent", params).await?;
        Ok(())
    }

    // --- scripting ----------------------------------------------------------

    /// Evaluate an expression in the page, returning its JSON value.
    pub async fn evaluate(&self, expression: &str) -> Result<Value, RpcError> {
        let result = self
            .page_call(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true }),
            )
            .await?;
        Ok(result
            .get("result")
            .and_then(|r| r.get("value"))
            .cloned()
            .unwrap_or(Value::Null))
    }
}

fn button_name(button: MouseButton) -> &'static str {
    match button {
        MouseButton::Left => "left",
        MouseButton::Middle => "middle",
        MouseButton::Right => "right",
        MouseButton::None => "none",
    }
}

/// One step of the canonical key-tap sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransition {
    Down,
    /// Text production between down and up; emitted only for keys that
    /// actually produce input.
    Char,
    Up,
}

/// Text a key tap produces, after modifier semantics. Control and meta
/// chords produce none.
fn key_text(base: BaseKey, mods: ModMask) -> Option<String> {
    if mods.intersects(ModMask::CTRL | ModMask::META) {
        return None;
    }
    match base {
        BaseKey::Char(c) => Some(c.to_string()),
        BaseKey::Named(core_events::NamedKey::Enter) => Some("\r".to_string()),
        BaseKey::Named(_) => None,
    }
}

/// Build the wire payload for one key transition, or `None` when the
/// transition is not emitted for this key (a `char` on a non-producing key).
///
/// Ctrl+Shift+P is rewritten to the meta-based chord so editor command
/// palettes behave the same on every platform.
fn wire_key_payload(key: &NormalizedKey, transition: KeyTransition) -> Option<Value> {
    let mut mods = key.mods;
    if let BaseKey::Char(c) = key.base
        && c.eq_ignore_ascii_case(&'p')
        && mods.contains(ModMask::CTRL | ModMask::SHIFT)
    {
        mods.remove(ModMask::CTRL);
        mods |= ModMask::META;
    }

    let kind = match transition {
        KeyTransition::Char => {
            let text = key_text(key.base, mods)?;
            return Some(json!({
                "type": "char",
                "text": text,
                "key": text,
                "modifiers": mods.bits(),
            }));
        }
        KeyTransition::Down => "keyDown",
        KeyTransition::Up => "keyUp",
    };
    match key.base {
        BaseKey::Char(c) => Some(json!({
            "type": kind,
            "key": c.to_string(),
            "modifiers": mods.bits(),
        })),
        BaseKey::Named(name) => {
            let (wire_key, wire_code) = named_key_wire(name);
            Some(json!({
                "type": kind,
                "key": wire_key,
                "code": wire_code,
                "modifiers": mods.bits(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_events::NamedKey;
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use tokio_tungstenite::tungstenite::Message;

    /// Server that answers every call with an empty result and records the
    /// requests it saw.
    async fn recording_session() -> (BrowserSession, tokio::sync::mpsc::UnboundedReceiver<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = accept_async(stream).await.expect("handshake");
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let req: Value = serde_json::from_str(text.as_str()).expect("json");
                    let reply = json!({ "id": req["id"], "result": {} });
                    if tx.send(req).is_err() {
                        break;
                    }
                    if ws.send(Message::text(reply.to_string())).await.is_err() {
                        break;
                    }
                }
            }
        });
        let transport = core_rpc::Transport::connect(&format!("ws://{addr}"))
            .await
            .expect("connect");
        (BrowserSession::new(core_rpc::RpcClient::new(transport)), rx)
    }

    #[tokio::test]
    async fn start_screencast_again_supersedes_without_stop() {
        let (session, mut seen) = recording_session().await;
        let params = ScreencastParams {
            quality: 35,
            max_width: 1120,
            max_height: 690,
            every_nth_frame: 2,
        };
        session.start_screencast(params).await.expect("first start");
        session
            .start_screencast(ScreencastParams { quality: 50, ..params })
            .await
            .expect("second start");

        let mut starts = 0;
        let mut stops = 0;
        while let Ok(req) = seen.try_recv() {
            match req["method"].as_str() {
                Some("Page.startScreencast") => starts += 1,
                Some("Page.stopScreencast") => stops += 1,
                _ => {}
            }
        }
        assert_eq!(starts, 2, "restart re-issues the start call");
        assert_eq!(stops, 0, "supersession requires no stop in between");
    }

    #[tokio::test]
    async fn history_step_past_either_end_is_noop() {
        let (session, _seen) = recording_session().await;
        // Empty result means no entries; stepping anywhere is a no-op.
        let moved = session.history_step(-1).await.expect("call");
        assert!(!moved);
    }

    fn payloads(key: &NormalizedKey) -> Vec<Value> {
        [KeyTransition::Down, KeyTransition::Char, KeyTransition::Up]
            .into_iter()
            .filter_map(|t| wire_key_payload(key, t))
            .collect()
    }

    #[test]
    fn char_key_taps_as_down_char_up() {
        let key = NormalizedKey::new(BaseKey::Char('x'), ModMask::empty());
        let seq = payloads(&key);
        assert_eq!(seq.len(), 3);
        assert_eq!(seq[0]["type"], "keyDown");
        assert_eq!(seq[0]["key"], "x");
        assert!(seq[0].get("text").is_none(), "text rides on the char event");
        assert_eq!(seq[1]["type"], "char");
        assert_eq!(seq[1]["text"], "x");
        assert_eq!(seq[2]["type"], "keyUp");
        assert!(seq[2].get("text").is_none());
    }

    #[test]
    fn control_chord_suppresses_char_event() {
        let key = NormalizedKey::new(BaseKey::Char('a'), ModMask::CTRL);
        let seq = payloads(&key);
        assert_eq!(seq.len(), 2, "no char event for a non-producing chord");
        assert_eq!(seq[0]["type"], "keyDown");
        assert_eq!(seq[1]["type"], "keyUp");
        assert_eq!(seq[0]["modifiers"], 2);
    }

    #[test]
    fn ctrl_shift_p_is_rewritten_to_meta() {
        let key = NormalizedKey::new(BaseKey::Char('P'), ModMask::CTRL | ModMask::SHIFT);
        let down = wire_key_payload(&key, KeyTransition::Down).expect("down");
        // alt=1 ctrl=2 meta=4 shift=8: expect meta|shift = 12.
        assert_eq!(down["modifiers"], 12);
        let up = wire_key_payload(&key, KeyTransition::Up).expect("up");
        assert_eq!(up["modifiers"], 12);
    }

    #[test]
    fn ctrl_shift_other_keys_keep_ctrl() {
        let key = NormalizedKey::new(BaseKey::Char('f'), ModMask::CTRL | ModMask::SHIFT);
        let down = wire_key_payload(&key, KeyTransition::Down).expect("down");
        assert_eq!(down["modifiers"], 10);
    }

    #[test]
    fn named_keys_carry_wire_code() {
        let key = NormalizedKey::new(BaseKey::Named(NamedKey::Left), ModMask::empty());
        let seq = payloads(&key);
        assert_eq!(seq.len(), 2, "arrows produce no char event");
        assert_eq!(seq[0]["key"], "ArrowLeft");
        assert_eq!(seq[0]["code"], "ArrowLeft");
    }

    #[test]
    fn enter_produces_a_carriage_return_char() {
        let enter = NormalizedKey::new(BaseKey::Named(NamedKey::Enter), ModMask::empty());
        let seq = payloads(&enter);
        assert_eq!(seq.len(), 3);
        assert_eq!(seq[1]["type"], "char");
        assert_eq!(seq[1]["text"], "\r");
    }
}
