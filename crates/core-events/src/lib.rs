//! Core event types and channel helpers shared across the termweb runtime.
//!
//! Everything the main loop consumes funnels through the single [`Event`]
//! enum: normalized terminal input, unsolicited browser protocol events, and
//! the periodic ticks that drive rendering and mouse coalescing.

use serde_json::Value;
use std::sync::atomic::AtomicU64;
use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

// -------------------------------------------------------------------------------------------------
// Channel policy
// -------------------------------------------------------------------------------------------------
// The main loop uses a single bounded mpsc channel. Producers that run on
// their own tasks (input service, tick sources) use `send().await`; producers
// that must never suspend (the RPC reader forwarding browser events) use
// `try_send` and bump `CHANNEL_SEND_FAILURES` on a full channel. With one
// consumer draining at render cadence the channel only fills when the viewer
// is wedged, in which case dropping a coalescable event is the right call.
// -------------------------------------------------------------------------------------------------
pub const EVENT_CHANNEL_CAP: usize = 8192;

// -------------------------------------------------------------------------------------------------
// Telemetry
// -------------------------------------------------------------------------------------------------
// Plain atomic counters (fetch_add relaxed). Inspected by unit tests and
// logged once at shutdown; not exported anywhere else.
// -------------------------------------------------------------------------------------------------
pub static CHANNEL_SEND_FAILURES: AtomicU64 = AtomicU64::new(0);
/// Screencast frames the pool producer discarded because every slot was held.
pub static FRAMES_DROPPED: AtomicU64 = AtomicU64::new(0);
/// Generation gaps observed by the renderer (frames produced but never drawn).
pub static FRAMES_SKIPPED: AtomicU64 = AtomicU64::new(0);
pub static FRAMES_RENDERED: AtomicU64 = AtomicU64::new(0);
/// Browser events dropped because a subscriber lagged behind the fanout queue.
pub static EVENTS_DROPPED: AtomicU64 = AtomicU64::new(0);
pub static RPC_TIMEOUTS: AtomicU64 = AtomicU64::new(0);
pub static PASTE_BYTES: AtomicU64 = AtomicU64::new(0);

/// Top-level event enum consumed by the viewer main loop.
#[derive(Debug, Clone)]
pub enum Event {
    Input(InputEvent),
    /// Unsolicited browser protocol event forwarded by the RPC reader.
    Browser(WireEvent),
    /// Render-cadence tick: poll the frame pool and run a render pass.
    FrameTick,
    /// 30 Hz tick consuming the coalesced mouse buffers.
    BusTick,
    Shutdown,
}

/// A domain-qualified protocol event (`method` has no request id).
///
/// Payloads are carried as raw JSON; domain crates pick apart only the
/// fields they need so unknown browser versions degrade gracefully.
#[derive(Debug, Clone)]
pub struct WireEvent {
    pub method: String,
    pub params: Value,
    /// Target session the event is scoped to, when attached.
    pub session_id: Option<String>,
}

/// Normalized input events produced by the terminal input service.
#[derive(Debug, Clone)]
pub enum InputEvent {
    Key(NormalizedKey),
    Mouse(MouseInput),
    /// Complete bracketed paste, captured intact. Never logged verbatim;
    /// instrumentation records byte length only.
    Paste(String),
    /// Terminal resize (columns, rows).
    Resize(u16, u16),
    FocusGained,
    FocusLost,
}

bitflags::bitflags! {
    /// Modifier flags laid out to match the browser wire encoding, so
    /// `bits()` is directly usable as the input-dispatch modifier mask.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ModMask: u8 {
        const ALT   = 1;
        const CTRL  = 2;
        const META  = 4;
        const SHIFT = 8;
    }
}

impl ModMask {
    /// The platform "command" modifier: meta on macOS, ctrl elsewhere.
    pub fn shortcut_mod() -> ModMask {
        if cfg!(target_os = "macos") {
            ModMask::META
        } else {
            ModMask::CTRL
        }
    }
}

/// Logical non-character keys surfaced by the normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamedKey {
    Escape,
    Enter,
    Backspace,
    Tab,
    Delete,
    Left,
    Right,
    Up,
    Down,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    F(u8),
}

/// Base key identity: a single Unicode scalar or a named key. Modifier
/// state never leaks into the glyph (`ctrl+a` carries `Char('a')`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseKey {
    Char(char),
    Named(NamedKey),
}

/// A fully normalized keystroke: base key, modifier flags, and the
/// precomputed platform shortcut flag used for app chord matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NormalizedKey {
    pub base: BaseKey,
    pub mods: ModMask,
    /// True when the platform command modifier is held.
    pub shortcut_mod: bool,
}

impl NormalizedKey {
    pub fn new(base: BaseKey, mods: ModMask) -> Self {
        let shortcut_mod = mods.contains(ModMask::shortcut_mod());
        Self {
            base,
            mods,
            shortcut_mod,
        }
    }

    /// Bitmask consumed by the browser input dispatch.
    pub fn wire_modifiers(&self) -> u8 {
        self.mods.bits()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseKind {
    Press,
    Release,
    Move,
    Drag,
    /// Wheel motion; deltas are in the `wheel_*` fields.
    Wheel,
}

/// A decoded terminal mouse event. Coordinates are raw as reported by the
/// terminal: cells under SGR-1006, pixels under SGR-1016. The coordinate
/// mapper resolves them against the negotiated reporting mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MouseInput {
    pub kind: MouseKind,
    pub button: MouseButton,
    pub x: u32,
    pub y: u32,
    /// Wheel step counts; positive is down/right. Zero for non-wheel kinds.
    pub wheel_x: i32,
    pub wheel_y: i32,
    pub mods: ModMask,
}

// -------------------------------------------------------------------------------------------------
// Async event sources
// -------------------------------------------------------------------------------------------------

/// Trait implemented by any async event producer. Implementors spawn one
/// background task that pushes [`Event`]s into the shared channel and exit
/// promptly once the channel closes.
pub trait AsyncEventSource: Send + 'static {
    /// Stable identifier used for logging.
    fn name(&self) -> &'static str;
    /// Consume self and spawn the background task. Implementors must stop
    /// when `tx.send(..).await` errors (channel closed) and must not busy
    /// loop; await timers or external IO instead.
    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()>;
}

/// Registry of event sources spawned together at startup.
pub struct EventSourceRegistry {
    sources: Vec<Box<dyn AsyncEventSource>>,
}

impl Default for EventSourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSourceRegistry {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    pub fn register<S: AsyncEventSource>(&mut self, src: S) {
        self.sources.push(Box::new(src));
    }

    /// Spawn all registered sources, returning their JoinHandles. Call after
    /// constructing the primary runtime channel and before the main loop
    /// starts consuming. During shutdown drop the final `Sender` clone before
    /// awaiting the handles so sources observe the closed channel and exit.
    pub fn spawn_all(&mut self, tx: &Sender<Event>) -> Vec<JoinHandle<()>> {
        let mut out = Vec::with_capacity(self.sources.len());
        for src in self.sources.drain(..) {
            let name = src.name();
            tracing::info!(target: "runtime.events", source = name, "spawning event source");
            out.push(src.spawn(tx.clone()));
        }
        out
    }
}

/// Periodic tick source emitting a caller-supplied event template.
///
/// Two instances drive the runtime: the frame-poll tick (render cadence)
/// and the 30 Hz event-bus tick.
pub struct TickEventSource {
    interval: std::time::Duration,
    event: Event,
    name: &'static str,
}

impl TickEventSource {
    pub fn new(name: &'static str, interval: std::time::Duration, event: Event) -> Self {
        Self {
            interval,
            event,
            name,
        }
    }
}

impl AsyncEventSource for TickEventSource {
    fn name(&self) -> &'static str {
        self.name
    }

    fn spawn(self: Box<Self>, tx: Sender<Event>) -> JoinHandle<()> {
        let dur = self.interval;
        let event = self.event;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(dur);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if tx.send(event.clone()).await.is_err() {
                    break;
                }
            }
        })
    }
}

/// Helper result type shared by channel setup code.
pub type EventResult<T> = anyhow::Result<T>;
