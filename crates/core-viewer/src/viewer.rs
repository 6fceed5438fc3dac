//! The top-level viewer: mode state machine, shortcut dispatch, tab
//! switching, render scheduling, and the main event loop.
//!
//! Ownership is a single-owner graph: the viewer owns the browser session,
//! the frame pool handle, the renderer, the tab store, and the event bus.
//! Handlers receive narrow pieces of that state; nothing holds a back
//! reference to the viewer.

use std::io::Write as _;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde_json::Value;
use tokio::sync::mpsc::Receiver;
use tracing::{debug, info, warn};

use core_chrome::{BrowserSession, ScreencastParams, ViewportSpec};
use core_config::Config;
use core_events::{
    BaseKey, Event, FRAMES_DROPPED, FRAMES_RENDERED, FRAMES_SKIPPED, InputEvent, ModMask,
    MouseButton, MouseInput, MouseKind, NamedKey, NormalizedKey, WireEvent,
};
use core_frame::{AdaptiveController, FramePool, Tier, now_unix_ms};
use core_input::{Action, ShortcutTable};
use core_render::{CursorPos, Layout, PromptView, Renderer, TermExtent, ToolbarContext};
use core_rpc::RpcError;

use crate::bus::EventBus;
use crate::hints::{COLLECT_HINTS_JS, HintOutcome, HintSet};
use crate::nav::{NavState, is_blank_url, normalize_address};
use crate::prompt::PromptBuffer;
use crate::tabs::{TabChange, TabStore};

/// Hint mode auto-selects the lowest remaining hint this long after the
/// last narrowing keystroke.
const HINT_TIMEOUT: Duration = Duration::from_millis(900);
/// Transient toolbar notes (downloads, navigation errors) expire after this.
const NOTE_TTL: Duration = Duration::from_secs(4);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Normal,
    UrlPrompt,
    HintMode,
}

#[derive(Debug, Clone, Copy)]
pub struct ViewerOptions {
    pub mobile: bool,
    /// Device pixel ratio; the CLI `--scale` flag wins over the config value.
    pub scale: f64,
}

pub struct Viewer {
    session: BrowserSession,
    pool: Arc<FramePool>,
    renderer: Renderer,
    shortcuts: ShortcutTable,
    bus: EventBus,
    tabs: TabStore,
    config: Config,
    term: TermExtent,

    mode: Mode,
    prompt: PromptBuffer,
    hints: Option<HintSet>,
    hint_deadline: Option<Instant>,
    picker_active: bool,

    nav: NavState,
    current_url: String,
    chrome: Option<(u32, u32)>,
    frame_dims: Option<(u32, u32)>,
    baseline_frame_h: Option<u32>,
    layout: Option<Layout>,

    adaptive: AdaptiveController,
    pending_tier: Option<Tier>,
    last_rendered_generation: u64,

    /// Last raw mouse position (cells or pixels per the reporting mode).
    mouse_raw: Option<(u32, u32)>,
    /// Last browser-space mouse position, used for wheel nudges.
    mouse_browser: (f64, f64),

    note: Option<(String, Instant)>,
    mobile: bool,
    scale: f64,
    should_quit: bool,
    /// Switches to the already-active tab; observable only here.
    tab_switch_noops: u64,
}

impl Viewer {
    pub fn new(
        session: BrowserSession,
        pool: Arc<FramePool>,
        renderer: Renderer,
        config: Config,
        term: TermExtent,
        opts: ViewerOptions,
    ) -> Self {
        let initial_tier = config.file.screencast.initial_tier;
        Self {
            session,
            pool,
            renderer,
            shortcuts: ShortcutTable::default(),
            bus: EventBus::default(),
            tabs: TabStore::default(),
            config,
            term,
            mode: Mode::Normal,
            prompt: PromptBuffer::default(),
            hints: None,
            hint_deadline: None,
            picker_active: false,
            nav: NavState::default(),
            current_url: String::new(),
            chrome: None,
            frame_dims: None,
            baseline_frame_h: None,
            layout: None,
            adaptive: AdaptiveController::new(initial_tier),
            pending_tier: None,
            last_rendered_generation: 0,
            mouse_raw: None,
            mouse_browser: (0.0, 0.0),
            note: None,
            mobile: opts.mobile,
            scale: opts.scale,
            should_quit: false,
            tab_switch_noops: 0,
        }
    }

    fn toolbar_rows(&self) -> u16 {
        if self.config.file.viewer.toolbar { 1 } else { 0 }
    }

    fn viewport_logical(&self) -> (u32, u32) {
        let toolbar_px = self.toolbar_rows() as f64 * self.term.cell_h();
        let w = self.term.width_px_or_derived();
        let h = (self.term.height_px_or_derived() - toolbar_px).max(1.0);
        (
            (w / self.scale).max(1.0) as u32,
            (h / self.scale).max(1.0) as u32,
        )
    }

    /// Open the start page: discover targets, create and attach the first
    /// tab, push the viewport, and start the screencast.
    pub async fn bootstrap(&mut self, start_url: &str) -> Result<()> {
        self.session.set_discover_targets().await?;
        if let Err(e) = self.session.enable_download_events().await {
            debug!(target: "viewer", error = %e, "download events unavailable");
        }
        let url = normalize_address(start_url);
        let target_id = self.session.create_target(&url).await?;
        self.session.attach(&target_id).await?;
        self.apply_viewport().await?;
        self.start_screencast_current().await?;
        self.current_url = url;
        self.nav.begin_loading();
        self.renderer.mark_ui_dirty();
        info!(target: "viewer", url = %self.current_url, "session open");
        Ok(())
    }

    async fn apply_viewport(&self) -> Result<(), RpcError> {
        let (w, h) = self.viewport_logical();
        self.session
            .set_viewport(ViewportSpec {
                width: w,
                height: h,
                device_scale_factor: self.scale,
                mobile: self.mobile,
            })
            .await
    }

    async fn start_screencast_current(&self) -> Result<(), RpcError> {
        let tier = self.adaptive.params();
        let (w, h) = self.viewport_logical();
        self.session
            .start_screencast(ScreencastParams {
                quality: tier.quality,
                max_width: (w as f64 * self.scale) as u32,
                max_height: (h as f64 * self.scale) as u32,
                every_nth_frame: tier.every_nth_frame,
            })
            .await
    }

    /// Main loop: drains the runtime channel until quit or channel close.
    pub async fn run(mut self, mut rx: Receiver<Event>) -> Result<()> {
        while let Some(event) = rx.recv().await {
            match event {
                Event::Input(InputEvent::Key(key)) => self.on_key(key).await?,
                Event::Input(InputEvent::Mouse(mouse)) => self.on_mouse(mouse).await?,
                Event::Input(InputEvent::Paste(text)) => self.on_paste(text).await?,
                Event::Input(InputEvent::Resize(cols, rows)) => self.on_resize(cols, rows).await?,
                Event::Input(InputEvent::FocusGained | InputEvent::FocusLost) => {}
                Event::Browser(ev) => self.on_browser_event(ev).await?,
                Event::FrameTick => self.on_frame_tick().await?,
                Event::BusTick => self.on_bus_tick().await?,
                Event::Shutdown => break,
            }
            if self.should_quit {
                break;
            }
        }
        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(mut self) {
        let mut buf = Vec::new();
        let _ = self.renderer.teardown(&mut buf);
        flush_stdout(&buf);
        self.session.client().shutdown().await;
        info!(
            target: "viewer",
            frames_rendered = FRAMES_RENDERED.load(Ordering::Relaxed),
            frames_skipped = FRAMES_SKIPPED.load(Ordering::Relaxed),
            frames_dropped = FRAMES_DROPPED.load(Ordering::Relaxed),
            tab_switch_noops = self.tab_switch_noops,
            "session closed"
        );
    }

    /// Route a non-terminal RPC failure into the toolbar note; terminal
    /// failures end the session.
    fn absorb_rpc(&mut self, context: &'static str, result: Result<(), RpcError>) -> Result<()> {
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.is_terminal() => Err(e.into()),
            Err(e) => {
                warn!(target: "viewer", context, error = %e, "browser call failed");
                self.set_note(format!("{context}: {e}"));
                Ok(())
            }
        }
    }

    fn set_note(&mut self, text: String) {
        self.note = Some((text, Instant::now()));
        self.renderer.mark_ui_dirty();
    }

    // --- keyboard ----------------------------------------------------------

    async fn on_key(&mut self, key: NormalizedKey) -> Result<()> {
        match self.mode {
            Mode::Normal => self.on_key_normal(key).await,
            Mode::UrlPrompt => self.on_key_prompt(key).await,
            Mode::HintMode => self.on_key_hints(key).await,
        }
    }

    async fn on_key_normal(&mut self, key: NormalizedKey) -> Result<()> {
        if self.picker_active {
            return self.on_key_picker(key).await;
        }
        if let Some(action) = self.shortcuts.lookup(&key) {
            if action.always_enabled() || self.action_enabled(action) {
                return self.perform_action(action).await;
            }
            // Disabled chord falls through to the page as a keystroke.
        }
        let result = self.session.send_key_tap(&key).await;
        self.absorb_rpc("key dispatch", result)
    }

    fn action_enabled(&self, action: Action) -> bool {
        match action {
            Action::FocusAddressBar | Action::TabPicker => self.config.file.viewer.toolbar,
            _ => true,
        }
    }

    async fn on_key_picker(&mut self, key: NormalizedKey) -> Result<()> {
        match key.base {
            BaseKey::Named(NamedKey::Escape) => {
                self.picker_active = false;
                self.renderer.mark_ui_dirty();
            }
            BaseKey::Char(c) if c.is_ascii_digit() && c != '0' => {
                let index = (c as u8 - b'1') as usize;
                self.picker_active = false;
                self.renderer.mark_ui_dirty();
                self.switch_to_tab(index).await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn perform_action(&mut self, action: Action) -> Result<()> {
        debug!(target: "viewer.action", ?action, "shortcut");
        match action {
            Action::Quit => self.should_quit = true,
            Action::FocusAddressBar => {
                self.mode = Mode::UrlPrompt;
                self.prompt = PromptBuffer::from_text(&self.current_url);
                self.prompt.select_all();
                self.renderer.mark_ui_dirty();
            }
            Action::Reload => {
                if self.nav.is_loading {
                    let r = self.session.stop_loading().await;
                    self.nav.finish_loading();
                    self.renderer.mark_ui_dirty();
                    self.absorb_rpc("stop", r)?;
                } else {
                    let r = self.session.reload(false).await;
                    self.nav.begin_loading();
                    self.renderer.mark_ui_dirty();
                    self.absorb_rpc("reload", r)?;
                }
            }
            Action::Stop => {
                let r = self.session.stop_loading().await;
                self.nav.finish_loading();
                self.renderer.mark_ui_dirty();
                self.absorb_rpc("stop", r)?;
            }
            Action::Back => {
                match self.session.history_step(-1).await {
                    Ok(true) => {
                        self.nav.begin_loading();
                        self.renderer.mark_ui_dirty();
                    }
                    Ok(false) => {}
                    Err(e) => self.absorb_rpc("back", Err(e))?,
                }
            }
            Action::Forward => {
                match self.session.history_step(1).await {
                    Ok(true) => {
                        self.nav.begin_loading();
                        self.renderer.mark_ui_dirty();
                    }
                    Ok(false) => {}
                    Err(e) => self.absorb_rpc("forward", Err(e))?,
                }
            }
            Action::ScrollDown | Action::ScrollUp => {
                let step = self.config.file.input.scroll_step as f64;
                let delta = if action == Action::ScrollDown { step } else { -step };
                let (x, y) = self.mouse_browser;
                let r = self.session.mouse_wheel(x, y, 0.0, delta, 0).await;
                self.absorb_rpc("scroll", r)?;
            }
            Action::TabPicker => {
                self.picker_active = true;
                self.renderer.mark_ui_dirty();
            }
            Action::NewTab => {
                match self.session.create_target("about:blank").await {
                    Ok(target_id) => {
                        // The created event also lands; upsert here so the
                        // switch can resolve the index immediately.
                        self.tabs.upsert(&serde_json::json!({
                            "targetId": target_id, "type": "page", "url": "about:blank",
                        }));
                        if let Some(index) = self.tabs.index_of(&target_id) {
                            self.switch_to_tab(index).await?;
                        }
                    }
                    Err(e) if e.is_terminal() => return Err(e.into()),
                    Err(e) => self.set_note(format!("new tab: {e}")),
                }
            }
            Action::CloseTab => {
                if let Some(tab) = self.tabs.active_tab() {
                    let target_id = tab.target_id.clone();
                    let r = self.session.close_target(&target_id).await;
                    self.absorb_rpc("close tab", r)?;
                    // The destroyed event rebinds or quits.
                }
            }
            Action::Copy | Action::Cut | Action::Paste | Action::SelectAll => {
                // Clipboard chords belong to the page; forward with the
                // platform command modifier.
                let c = match action {
                    Action::Copy => 'c',
                    Action::Cut => 'x',
                    Action::Paste => 'v',
                    _ => 'a',
                };
                let chord = NormalizedKey::new(BaseKey::Char(c), ModMask::shortcut_mod());
                let r = self.session.send_key_tap(&chord).await;
                self.absorb_rpc("clipboard", r)?;
            }
            Action::EnterHintMode => self.enter_hint_mode().await?,
            Action::DevConsole => {
                let f12 = NormalizedKey::new(BaseKey::Named(NamedKey::F(12)), ModMask::empty());
                let r = self.session.send_key_tap(&f12).await;
                self.absorb_rpc("devtools", r)?;
            }
        }
        Ok(())
    }

    async fn on_key_prompt(&mut self, key: NormalizedKey) -> Result<()> {
        let word_mod = key.mods.intersects(ModMask::ALT | ModMask::CTRL);
        let select = key.mods.contains(ModMask::SHIFT);
        match key.base {
            BaseKey::Named(NamedKey::Escape) => {
                self.mode = Mode::Normal;
                self.renderer.mark_ui_dirty();
            }
            BaseKey::Named(NamedKey::Enter) => {
                let target = normalize_address(&self.prompt.text());
                self.mode = Mode::Normal;
                self.renderer.mark_ui_dirty();
                self.navigate_to(target).await?;
            }
            BaseKey::Named(NamedKey::Backspace) => {
                self.prompt.backspace();
                self.renderer.mark_ui_dirty();
            }
            BaseKey::Named(NamedKey::Delete) => {
                self.prompt.delete();
                self.renderer.mark_ui_dirty();
            }
            BaseKey::Named(NamedKey::Left) => {
                if word_mod {
                    self.prompt.word_left(select);
                } else {
                    self.prompt.left(select);
                }
                self.renderer.mark_ui_dirty();
            }
            BaseKey::Named(NamedKey::Right) => {
                if word_mod {
                    self.prompt.word_right(select);
                } else {
                    self.prompt.right(select);
                }
                self.renderer.mark_ui_dirty();
            }
            BaseKey::Named(NamedKey::Home) => {
                self.prompt.home(select);
                self.renderer.mark_ui_dirty();
            }
            BaseKey::Named(NamedKey::End) => {
                self.prompt.end(select);
                self.renderer.mark_ui_dirty();
            }
            BaseKey::Char(c) => {
                if key.shortcut_mod {
                    match c.to_ascii_lowercase() {
                        'a' => self.prompt.select_all(),
                        'x' => {
                            let _ = self.prompt.cut_selection();
                        }
                        // Quit still works from the prompt.
                        'q' => self.should_quit = true,
                        _ => {}
                    }
                } else if !key.mods.intersects(ModMask::CTRL | ModMask::META) {
                    self.prompt.insert_char(c);
                }
                self.renderer.mark_ui_dirty();
            }
            _ => {}
        }
        Ok(())
    }

    async fn on_key_hints(&mut self, key: NormalizedKey) -> Result<()> {
        match key.base {
            BaseKey::Named(NamedKey::Escape) => self.exit_hint_mode(),
            BaseKey::Char(c) => {
                let outcome = match self.hints.as_mut() {
                    Some(set) => set.type_char(c),
                    None => HintOutcome::NoMatch,
                };
                match outcome {
                    HintOutcome::Pending => {
                        self.hint_deadline = Some(Instant::now() + HINT_TIMEOUT);
                    }
                    HintOutcome::Match(hint) => {
                        self.exit_hint_mode();
                        self.click_at(hint.x, hint.y).await?;
                    }
                    HintOutcome::NoMatch => self.exit_hint_mode(),
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn enter_hint_mode(&mut self) -> Result<()> {
        match self.session.evaluate(COLLECT_HINTS_JS).await {
            Ok(value) => {
                let set = HintSet::from_eval_result(&value);
                if set.is_empty() {
                    self.set_note("no interactive elements".to_string());
                    return Ok(());
                }
                self.hints = Some(set);
                self.hint_deadline = Some(Instant::now() + HINT_TIMEOUT);
                self.mode = Mode::HintMode;
                self.renderer.mark_ui_dirty();
            }
            Err(e) if e.is_terminal() => return Err(e.into()),
            Err(e) => self.set_note(format!("hints: {e}")),
        }
        Ok(())
    }

    fn exit_hint_mode(&mut self) {
        self.mode = Mode::Normal;
        self.hints = None;
        self.hint_deadline = None;
        self.renderer.mark_ui_dirty();
    }

    async fn click_at(&mut self, x: f64, y: f64) -> Result<()> {
        let r = self.session.mouse_pressed(x, y, MouseButton::Left, 0).await;
        self.absorb_rpc("click", r)?;
        let r = self.session.mouse_released(x, y, MouseButton::Left, 0).await;
        self.absorb_rpc("click", r)
    }

    // --- mouse -------------------------------------------------------------

    async fn on_mouse(&mut self, mouse: MouseInput) -> Result<()> {
        self.mouse_raw = Some((mouse.x, mouse.y));
        // Before the first frame (blank page) a provisional layout still
        // lets toolbar clicks resolve.
        let layout = self.layout.unwrap_or_else(|| {
            let (fw, fh) = self.frame_dims.unwrap_or((0, 0));
            Layout::compute(self.term, fw, fh, self.chrome, self.toolbar_rows(), None)
        });

        // A click outside the toolbar blurs the prompt.
        if self.mode == Mode::UrlPrompt
            && mouse.kind == MouseKind::Press
            && !in_toolbar(&layout, mouse.x, mouse.y)
        {
            self.mode = Mode::Normal;
            self.renderer.mark_ui_dirty();
        }

        if in_toolbar(&layout, mouse.x, mouse.y) {
            if mouse.kind == MouseKind::Press {
                let col = toolbar_col(&layout, mouse.x);
                match toolbar_hit(col) {
                    ToolbarHit::Back => return self.perform_action(Action::Back).await,
                    ToolbarHit::Forward => return self.perform_action(Action::Forward).await,
                    ToolbarHit::ReloadOrStop => return self.perform_action(Action::Reload).await,
                    ToolbarHit::UrlField => {
                        if self.config.file.viewer.toolbar {
                            return self.perform_action(Action::FocusAddressBar).await;
                        }
                    }
                }
            }
            return Ok(());
        }

        let Some((bx, by)) = layout.terminal_to_browser(mouse.x, mouse.y) else {
            return Ok(());
        };
        self.mouse_browser = (bx, by);
        let mods = mouse.mods.bits();

        match mouse.kind {
            // Presses and releases are never coalesced or reordered.
            MouseKind::Press => {
                let r = self.session.mouse_pressed(bx, by, mouse.button, mods).await;
                self.absorb_rpc("mouse", r)?;
            }
            MouseKind::Release => {
                let r = self.session.mouse_released(bx, by, mouse.button, mods).await;
                self.absorb_rpc("mouse", r)?;
            }
            MouseKind::Move => self.bus.record_move(bx, by, MouseButton::None, mods),
            MouseKind::Drag => self.bus.record_move(bx, by, mouse.button, mods),
            MouseKind::Wheel => {
                let step = self.config.file.input.scroll_step as f64;
                let sign = if self.config.natural_scroll() { -1.0 } else { 1.0 };
                self.bus.record_wheel(
                    bx,
                    by,
                    mouse.wheel_x as f64 * step * sign,
                    mouse.wheel_y as f64 * step * sign,
                    mods,
                );
            }
        }
        Ok(())
    }

    async fn on_bus_tick(&mut self) -> Result<()> {
        let flush = self.bus.take_tick(self.session.client().is_saturated());
        if let Some(m) = flush.movement {
            let r = self.session.mouse_moved(m.x, m.y, m.button, m.modifiers).await;
            self.absorb_rpc("mouse move", r)?;
        }
        if let Some(w) = flush.wheel {
            let r = self
                .session
                .mouse_wheel(w.x, w.y, w.delta_x, w.delta_y, w.modifiers)
                .await;
            self.absorb_rpc("wheel", r)?;
        }
        Ok(())
    }

    // --- paste -------------------------------------------------------------

    async fn on_paste(&mut self, text: String) -> Result<()> {
        match self.mode {
            Mode::Normal => {
                let r = self.session.insert_text(&text).await;
                self.absorb_rpc("paste", r)?;
            }
            Mode::UrlPrompt => {
                self.prompt.insert_str(&text);
                self.renderer.mark_ui_dirty();
            }
            Mode::HintMode => {}
        }
        Ok(())
    }

    // --- browser events ----------------------------------------------------

    async fn on_browser_event(&mut self, event: WireEvent) -> Result<()> {
        match event.method.as_str() {
            "Page.loadEventFired" => {
                self.nav.finish_loading();
                self.refresh_navigation().await?;
                self.renderer.mark_ui_dirty();
            }
            "Page.frameNavigated" => {
                let frame = &event.params["frame"];
                // Only the main frame owns the address bar.
                if frame.get("parentId").is_none()
                    && let Some(url) = frame.get("url").and_then(Value::as_str)
                {
                    self.current_url = url.to_string();
                    self.refresh_navigation().await?;
                    self.renderer.mark_ui_dirty();
                }
            }
            "Page.navigatedWithinDocument" => {
                if let Some(url) = event.params.get("url").and_then(Value::as_str) {
                    self.current_url = url.to_string();
                    self.renderer.mark_ui_dirty();
                }
            }
            "Target.targetCreated" | "Target.targetInfoChanged" => {
                self.on_target_info(&event.params["targetInfo"]).await?;
            }
            "Target.targetDestroyed" => {
                if let Some(target_id) = event.params.get("targetId").and_then(Value::as_str) {
                    let was_active = self
                        .tabs
                        .active_tab()
                        .is_some_and(|t| t.target_id == target_id);
                    if let TabChange::Removed(_) = self.tabs.remove(target_id) {
                        self.renderer.mark_ui_dirty();
                        if self.tabs.is_empty() {
                            info!(target: "viewer", "last tab closed");
                            self.should_quit = true;
                        } else if was_active {
                            let index = self.tabs.active_index();
                            self.rebind_active_tab(index).await?;
                        }
                    }
                }
            }
            "Browser.downloadWillBegin" => {
                let name = event
                    .params
                    .get("suggestedFilename")
                    .and_then(Value::as_str)
                    .unwrap_or("download");
                self.set_note(format!("downloading {name}"));
                // Record the pre-download frame height so a shrinking frame
                // keeps its on-screen alignment.
                self.baseline_frame_h = self.frame_dims.map(|(_, h)| h);
            }
            "Browser.downloadProgress" => {
                if event.params.get("state").and_then(Value::as_str) == Some("completed") {
                    self.set_note("download complete".to_string());
                    self.baseline_frame_h = None;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn on_target_info(&mut self, info: &Value) -> Result<()> {
        let change = self.tabs.upsert(info);
        match change {
            TabChange::Created(index) => {
                self.renderer.mark_ui_dirty();
                let is_first = self.tabs.len() == 1;
                if is_first {
                    self.tabs.set_active(index);
                } else if self.config.file.viewer.single_tab {
                    // Single-tab mode: navigate in place and drop the
                    // spawned target.
                    let Some(tab) = self.tabs.get(index) else {
                        return Ok(());
                    };
                    let (url, target_id) = (tab.url.clone(), tab.target_id.clone());
                    self.tabs.remove(&target_id);
                    let r = self.session.close_target(&target_id).await;
                    self.absorb_rpc("single-tab close", r)?;
                    if !is_blank_url(&url) {
                        self.navigate_to(url).await?;
                    }
                }
            }
            TabChange::Updated(index) => {
                if index == self.tabs.active_index()
                    && let Some(tab) = self.tabs.get(index)
                    && tab.url != self.current_url
                {
                    self.current_url = tab.url.clone();
                }
                self.renderer.mark_ui_dirty();
            }
            TabChange::Removed(_) | TabChange::Ignored => {}
        }
        Ok(())
    }

    async fn refresh_navigation(&mut self) -> Result<()> {
        match self.session.history_state().await {
            Ok(history) => {
                if self.nav.apply_history(history) {
                    self.renderer.mark_ui_dirty();
                }
            }
            Err(e) if e.is_terminal() => return Err(e.into()),
            Err(e) => debug!(target: "viewer", error = %e, "history refresh failed"),
        }
        match self.session.layout_viewport().await {
            Ok((w, h)) if w > 0 && h > 0 => self.chrome = Some((w, h)),
            Ok(_) => {}
            Err(e) if e.is_terminal() => return Err(e.into()),
            Err(e) => debug!(target: "viewer", error = %e, "viewport query failed"),
        }
        Ok(())
    }

    // --- navigation --------------------------------------------------------

    async fn navigate_to(&mut self, url: String) -> Result<()> {
        let r = self.session.navigate(&url).await;
        self.current_url = url;
        self.nav.begin_loading();
        self.renderer.mark_ui_dirty();
        self.absorb_rpc("navigate", r)
    }

    // --- tabs ---------------------------------------------------------------

    async fn switch_to_tab(&mut self, index: usize) -> Result<()> {
        if index == self.tabs.active_index() && self.tabs.get(index).is_some() {
            self.tab_switch_noops += 1;
            return Ok(());
        }
        if !self.tabs.set_active(index) {
            return Ok(());
        }
        self.rebind_active_tab(index).await
    }

    /// Attach, re-set the viewport, and restart the screencast at the
    /// current tier for the tab at `index`.
    async fn rebind_active_tab(&mut self, index: usize) -> Result<()> {
        let Some(tab) = self.tabs.get(index) else {
            return Ok(());
        };
        let target_id = tab.target_id.clone();
        let url = tab.url.clone();

        let mut buf = Vec::new();
        self.renderer.clear_content(&mut buf)?;
        flush_stdout(&buf);

        match self.session.attach(&target_id).await {
            Ok(_) => {}
            Err(e) if e.is_terminal() => return Err(e.into()),
            Err(e) => {
                self.set_note(format!("tab switch: {e}"));
                return Ok(());
            }
        }
        let r = self.apply_viewport().await;
        self.absorb_rpc("viewport", r)?;
        let r = self.start_screencast_current().await;
        self.absorb_rpc("screencast", r)?;
        let r = self.session.activate_target(&target_id).await;
        self.absorb_rpc("activate", r)?;

        self.current_url = url;
        self.refresh_navigation().await?;
        self.renderer.mark_ui_dirty();
        info!(target: "viewer.tabs", index, "tab switched");
        Ok(())
    }

    // --- resize ------------------------------------------------------------

    async fn on_resize(&mut self, cols: u16, rows: u16) -> Result<()> {
        let (new_cols, new_rows, width_px, height_px) =
            core_terminal::CrosstermBackend::extent().unwrap_or((cols, rows, 0, 0));
        self.term = TermExtent {
            cols: new_cols,
            rows: new_rows,
            width_px,
            height_px,
            pixel_mouse: self.term.pixel_mouse,
        };
        let mut buf = Vec::new();
        self.renderer.clear_content(&mut buf)?;
        flush_stdout(&buf);
        let r = self.apply_viewport().await;
        self.absorb_rpc("viewport", r)?;
        let r = self.start_screencast_current().await;
        self.absorb_rpc("screencast", r)?;
        self.renderer.mark_ui_dirty();
        Ok(())
    }

    // --- render tick -------------------------------------------------------

    async fn on_frame_tick(&mut self) -> Result<()> {
        let now = Instant::now();

        // Hint timeout: auto-select the lowest remaining hint.
        if self.mode == Mode::HintMode
            && self.hint_deadline.is_some_and(|d| now >= d)
        {
            let target = self
                .hints
                .as_ref()
                .and_then(|set| set.lowest())
                .map(|h| (h.x, h.y));
            self.exit_hint_mode();
            if let Some((x, y)) = target {
                self.click_at(x, y).await?;
            }
        }

        if self.nav.check_deadline(now) {
            self.renderer.mark_ui_dirty();
        }
        if self
            .note
            .as_ref()
            .is_some_and(|(_, at)| now.duration_since(*at) >= NOTE_TTL)
        {
            self.note = None;
            self.renderer.mark_ui_dirty();
        }

        // Tier changes queue here and restart the screencast from the main
        // loop, never from the reader.
        if let Some(tier) = self.pending_tier.take() {
            debug!(target: "viewer", quality = tier.quality, "applying tier change");
            let r = self.session.stop_screencast().await;
            self.absorb_rpc("screencast stop", r)?;
            let r = self.start_screencast_current().await;
            self.absorb_rpc("screencast start", r)?;
        }

        self.render_pass()?;
        Ok(())
    }

    fn render_pass(&mut self) -> Result<()> {
        let mut buf = Vec::with_capacity(32 * 1024);

        if is_blank_url(&self.current_url) {
            self.renderer
                .draw_blank_placeholder(&mut buf, self.term.cols, self.term.rows)?;
        } else {
            let newest = self.pool.latest_generation();
            if newest > self.last_rendered_generation
                && let Some(frame) = self.pool.acquire_latest()
                && frame.generation > self.last_rendered_generation
            {
                let skipped = frame.generation - self.last_rendered_generation - 1;
                if self.last_rendered_generation > 0 && skipped > 0 {
                    FRAMES_SKIPPED.fetch_add(skipped, Ordering::Relaxed);
                }
                self.frame_dims = Some((frame.device_width, frame.device_height));
                let layout = Layout::compute(
                    self.term,
                    frame.device_width,
                    frame.device_height,
                    self.chrome,
                    self.toolbar_rows(),
                    self.baseline_frame_h,
                );
                self.layout = Some(layout);
                self.renderer
                    .draw_content(&mut buf, &frame, &layout, self.mode == Mode::HintMode)?;
                self.last_rendered_generation = frame.generation;
                FRAMES_RENDERED.fetch_add(1, Ordering::Relaxed);

                let age_ms = now_unix_ms().saturating_sub(frame.browser_ts_ms) as f64;
                if let Some(tier) = self.adaptive.on_frame(age_ms, self.renderer.last_blit_ms()) {
                    self.pending_tier = Some(tier);
                }
            }
        }

        if self.mode == Mode::HintMode {
            self.draw_hint_labels(&mut buf)?;
        }

        if self.toolbar_rows() > 0 {
            let prompt_text = self.prompt.text();
            let titles = self.picker_active.then(|| self.tabs.titles());
            let toolbar_ctx = ToolbarContext {
                url: &self.current_url,
                prompt: (self.mode == Mode::UrlPrompt).then(|| PromptView {
                    text: &prompt_text,
                    cursor: self.prompt.cursor(),
                    selection: self.prompt.selection(),
                }),
                is_loading: self.nav.is_loading,
                can_go_back: self.nav.can_go_back,
                can_go_forward: self.nav.can_go_forward,
                tab_index: self.tabs.active_index(),
                tab_count: self.tabs.len(),
                note: self.note.as_ref().map(|(n, _)| n.as_str()),
                picker: titles.as_deref(),
            };
            self.renderer
                .draw_toolbar(&mut buf, &toolbar_ctx, self.term.cols)?;
        }

        self.draw_cursor_overlay(&mut buf)?;

        // Exactly one flush per pass.
        flush_stdout(&buf);
        Ok(())
    }

    fn draw_cursor_overlay(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        let (Some(layout), Some((rx, ry))) = (self.layout, self.mouse_raw) else {
            return Ok(());
        };
        if layout.terminal_to_browser(rx, ry).is_none() {
            self.renderer.hide_cursor_overlay(buf)?;
            return Ok(());
        }
        let pos = cursor_cell(&layout, rx, ry);
        self.renderer.draw_cursor(buf, pos)?;
        Ok(())
    }

    fn draw_hint_labels(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        let (Some(layout), Some(hints)) = (self.layout.as_ref(), self.hints.as_ref()) else {
            return Ok(());
        };
        for hint in hints.remaining() {
            // Browser → display pixels → cell.
            let px = hint.x * layout.display_w / layout.chrome_w;
            let py = hint.y * layout.display_h / layout.chrome_h + layout.toolbar_px;
            let (col, row) = layout.pixel_to_cell(px, py);
            if row == 0 || row >= self.term.rows || col >= self.term.cols {
                continue;
            }
            use crossterm::{cursor::MoveTo, queue, style::Print};
            queue!(
                buf,
                MoveTo(col, row),
                Print(format!("\x1b[1;30;43m{}\x1b[0m", hint.label))
            )?;
        }
        Ok(())
    }
}

fn flush_stdout(buf: &[u8]) {
    if buf.is_empty() {
        return;
    }
    let mut out = std::io::stdout().lock();
    let _ = out.write_all(buf);
    let _ = out.flush();
}

/// True when the raw position falls on the toolbar row.
fn in_toolbar(layout: &Layout, _x: u32, y: u32) -> bool {
    if layout.pixel_mouse {
        (y as f64) < layout.toolbar_px
    } else {
        y == 0 && layout.toolbar_px > 0.0
    }
}

/// Toolbar column for a raw x position.
fn toolbar_col(layout: &Layout, x: u32) -> u16 {
    if layout.pixel_mouse {
        if layout.cell_w > 0.0 { (x as f64 / layout.cell_w) as u16 } else { 0 }
    } else {
        x as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ToolbarHit {
    Back,
    Forward,
    ReloadOrStop,
    UrlField,
}

/// Click zones matching the composed toolbar: ` ‹ › ⟳ <url…>`.
fn toolbar_hit(col: u16) -> ToolbarHit {
    match col {
        0..=2 => ToolbarHit::Back,
        3..=4 => ToolbarHit::Forward,
        5..=6 => ToolbarHit::ReloadOrStop,
        _ => ToolbarHit::UrlField,
    }
}

/// Cursor overlay cell plus sub-cell pixel offsets for a raw position.
fn cursor_cell(layout: &Layout, rx: u32, ry: u32) -> CursorPos {
    if layout.pixel_mouse {
        let (col, row) = layout.pixel_to_cell(rx as f64, ry as f64);
        let x_off = (rx as f64 - col as f64 * layout.cell_w).max(0.0) as u32;
        let y_off = (ry as f64 - row as f64 * layout.cell_h).max(0.0) as u32;
        CursorPos {
            col,
            row,
            x_off_px: x_off,
            y_off_px: y_off,
        }
    } else {
        CursorPos {
            col: rx as u16,
            row: ry as u16,
            x_off_px: 0,
            y_off_px: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(pixel_mouse: bool) -> Layout {
        let term = TermExtent {
            cols: 80,
            rows: 24,
            width_px: 1120,
            height_px: 720,
            pixel_mouse,
        };
        Layout::compute(term, 1120, 690, Some((1120, 690)), 1, None)
    }

    #[test]
    fn toolbar_hit_zones() {
        assert_eq!(toolbar_hit(0), ToolbarHit::Back);
        assert_eq!(toolbar_hit(2), ToolbarHit::Back);
        assert_eq!(toolbar_hit(3), ToolbarHit::Forward);
        assert_eq!(toolbar_hit(5), ToolbarHit::ReloadOrStop);
        assert_eq!(toolbar_hit(20), ToolbarHit::UrlField);
    }

    #[test]
    fn toolbar_detection_in_both_mouse_modes() {
        let l = layout(true);
        assert!(in_toolbar(&l, 100, 10));
        assert!(!in_toolbar(&l, 100, 35));
        let l = layout(false);
        assert!(in_toolbar(&l, 10, 0));
        assert!(!in_toolbar(&l, 10, 1));
    }

    #[test]
    fn cursor_cell_pixel_mode_has_subcell_offsets() {
        let l = layout(true);
        // cell_w = 14, cell_h = 30.
        let pos = cursor_cell(&l, 31, 65);
        assert_eq!((pos.col, pos.row), (2, 2));
        assert_eq!((pos.x_off_px, pos.y_off_px), (3, 5));
    }

    #[test]
    fn cursor_cell_cell_mode_is_exact() {
        let l = layout(false);
        let pos = cursor_cell(&l, 12, 7);
        assert_eq!((pos.col, pos.row), (12, 7));
        assert_eq!((pos.x_off_px, pos.y_off_px), (0, 0));
    }
}
