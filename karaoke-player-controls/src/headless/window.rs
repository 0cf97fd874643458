use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use tokio::sync::broadcast::{self, Receiver, Sender};
use tracing::debug;

use crate::{
    Result,
    error::Error,
    window::{Geometry, PendingWindow, Window, WindowEvent, WindowOptions, WindowSystem},
};

const SCREEN: (u32, u32) = (1920, 1080);

type MountHook = Arc<dyn Fn(Arc<HeadlessWindow>) + Send + Sync>;
type UnloadHook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Registry {
    windows: Mutex<HashMap<String, Arc<HeadlessWindow>>>,
    mount: Mutex<Option<MountHook>>,
    fail_next: Mutex<Option<String>>,
    stall_next: AtomicBool,
    created: AtomicUsize,
}

impl Registry {
    fn windows(&self) -> MutexGuard<'_, HashMap<String, Arc<HeadlessWindow>>> {
        lock(&self.windows)
    }

    fn remove(&self, window: &HeadlessWindow) {
        let mut windows = self.windows();
        if windows
            .get(&window.label)
            .is_some_and(|registered| std::ptr::eq(registered.as_ref(), window))
        {
            windows.remove(&window.label);
        }
    }
}

/// In-memory window system. Windows are created asynchronously, like a real
/// compositor would, and can be asked to close or made to crash.
#[derive(Default)]
pub struct HeadlessWindowSystem {
    registry: Arc<Registry>,
}

impl HeadlessWindowSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs once a window reports `Created`, standing in for the page that
    /// boots inside it.
    pub fn on_mount(&self, hook: impl Fn(Arc<HeadlessWindow>) + Send + Sync + 'static) {
        *lock(&self.registry.mount) = Some(Arc::new(hook));
    }

    pub fn fail_next_create(&self, message: &str) {
        *lock(&self.registry.fail_next) = Some(message.to_string());
    }

    /// The next window never confirms creation.
    pub fn stall_next_create(&self) {
        self.registry.stall_next.store(true, Ordering::SeqCst);
    }

    pub fn created_count(&self) -> usize {
        self.registry.created.load(Ordering::SeqCst)
    }

    pub fn window(&self, label: &str) -> Option<Arc<HeadlessWindow>> {
        self.registry.windows().get(label).cloned()
    }

    /// Leaves a window behind as if a previous session had crashed.
    pub fn insert_stale(&self, label: &str) -> Arc<HeadlessWindow> {
        let options = WindowOptions {
            label: label.to_string(),
            ..Default::default()
        };
        let window = Arc::new(HeadlessWindow::new(options, &self.registry));
        self.registry
            .windows()
            .insert(label.to_string(), window.clone());
        window
    }
}

#[async_trait]
impl WindowSystem for HeadlessWindowSystem {
    fn windows(&self) -> Vec<Arc<dyn Window>> {
        self.registry
            .windows()
            .values()
            .map(|window| window.clone() as Arc<dyn Window>)
            .collect()
    }

    async fn create(&self, options: &WindowOptions) -> Result<PendingWindow> {
        let window = {
            let mut windows = self.registry.windows();
            if windows.contains_key(&options.label) {
                return Err(Error::WindowCreation {
                    label: options.label.clone(),
                    message: "label already in use".to_string(),
                });
            }

            let window = Arc::new(HeadlessWindow::new(options.clone(), &self.registry));
            windows.insert(options.label.clone(), window.clone());
            window
        };

        let events = window.events.subscribe();
        let failure = lock(&self.registry.fail_next).take();
        let stall = self.registry.stall_next.swap(false, Ordering::SeqCst);
        let registry = self.registry.clone();
        let created = window.clone();

        tokio::spawn(async move {
            tokio::task::yield_now().await;

            if stall {
                debug!(label = %created.label, "window creation stalled");
                return;
            }

            if let Some(message) = failure {
                registry.remove(&created);
                created.emit(WindowEvent::CreationFailed(message));
                return;
            }

            registry.created.fetch_add(1, Ordering::SeqCst);
            created.emit(WindowEvent::Created);

            let mount = lock(&registry.mount).clone();
            if let Some(mount) = mount {
                mount(created);
            }
        });

        Ok(PendingWindow { window, events })
    }
}

pub struct HeadlessWindow {
    label: String,
    options: WindowOptions,
    events: Sender<WindowEvent>,
    closed: AtomicBool,
    fail_close: AtomicBool,
    focus_count: AtomicUsize,
    unload: Mutex<Vec<UnloadHook>>,
    registry: Weak<Registry>,
}

impl HeadlessWindow {
    fn new(options: WindowOptions, registry: &Arc<Registry>) -> Self {
        let (events, _) = broadcast::channel(16);

        Self {
            label: options.label.clone(),
            options,
            events,
            closed: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
            focus_count: AtomicUsize::new(0),
            unload: Mutex::new(Vec::new()),
            registry: Arc::downgrade(registry),
        }
    }

    pub fn options(&self) -> &WindowOptions {
        &self.options
    }

    /// Runs while the window closes, before it is destroyed. Skipped on crash.
    pub fn on_unload(&self, hook: impl FnOnce() + Send + 'static) {
        lock(&self.unload).push(Box::new(hook));
    }

    /// The user clicked the close button.
    pub fn request_close(&self) {
        self.emit(WindowEvent::CloseRequested);
    }

    /// The window disappears without running any unload hook.
    pub fn crash(&self) {
        lock(&self.unload).clear();
        self.destroy();
    }

    pub fn fail_next_close(&self) {
        self.fail_close.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn focus_count(&self) -> usize {
        self.focus_count.load(Ordering::SeqCst)
    }

    fn emit(&self, event: WindowEvent) {
        if self.events.send(event).is_err() {
            debug!(label = %self.label, "no window event listeners");
        }
    }

    fn destroy(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self);
        }

        self.emit(WindowEvent::Destroyed);
    }
}

#[async_trait]
impl Window for HeadlessWindow {
    fn label(&self) -> &str {
        &self.label
    }

    fn geometry(&self) -> Geometry {
        let (screen_width, screen_height) = SCREEN;
        let (x, y) = if self.options.centered {
            (
                (screen_width.saturating_sub(self.options.width) / 2) as i32,
                (screen_height.saturating_sub(self.options.height) / 2) as i32,
            )
        } else {
            (0, 0)
        };

        Geometry {
            x,
            y,
            width: self.options.width,
            height: self.options.height,
        }
    }

    fn events(&self) -> Receiver<WindowEvent> {
        self.events.subscribe()
    }

    async fn focus(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::WindowFocus {
                label: self.label.clone(),
                message: "window is closed".to_string(),
            });
        }

        self.focus_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.fail_close.swap(false, Ordering::SeqCst) {
            return Err(Error::WindowClose {
                label: self.label.clone(),
                message: "close refused".to_string(),
            });
        }

        if self.is_closed() {
            return Err(Error::WindowClose {
                label: self.label.clone(),
                message: "window is already closed".to_string(),
            });
        }

        let hooks = std::mem::take(&mut *lock(&self.unload));
        for hook in hooks {
            hook();
        }

        self.destroy();
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
