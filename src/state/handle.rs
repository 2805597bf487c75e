use super::{Broker, MemoryStateHandler, SharedCache, StateHandler};
use crate::config::StateConfig;
use crate::core::Result;
use lazy_static::lazy_static;
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::info;

struct Installed {
    generation: u64,
    handler: Arc<dyn StateHandler>,
}

lazy_static! {
    static ref INSTALLED: RwLock<Installed> = RwLock::new(Installed {
        generation: 0,
        handler: Arc::new(MemoryStateHandler::new()),
    });
}

static GENERATION: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static LOCAL: RefCell<Option<(u64, Arc<dyn StateHandler>)>> = const { RefCell::new(None) };
}

/// Selects the process-wide handler. Threads pick it up on their next
/// [`current`] call.
pub fn install(handler: Arc<dyn StateHandler>) -> Result<()> {
    let mut installed = INSTALLED.write()?;
    installed.generation += 1;
    installed.handler = handler;
    GENERATION.store(installed.generation, Ordering::Release);
    Ok(())
}

/// Builds the handler `config` selects and makes it the process-wide one.
/// Meant for startup, before any engine is built.
pub async fn install_from_config(
    config: &StateConfig,
    services: &StateServices,
) -> Result<Arc<dyn StateHandler>> {
    let handler = config.build(services).await?;
    install(Arc::clone(&handler))?;
    info!(backend = handler.backend(), "state handler installed");
    Ok(handler)
}

/// The process-wide handler, local memory unless another one was installed.
/// Cached per thread.
///
/// Entries are keyed by definition id alone, so a process is expected to
/// serve one definition store. Engines over unrelated stores in the same
/// process need their own handler, given through `SchemaEngineBuilder::state`.
pub fn current() -> Result<Arc<dyn StateHandler>> {
    let generation = GENERATION.load(Ordering::Acquire);
    let cached = LOCAL.with(|local| {
        local
            .borrow()
            .as_ref()
            .filter(|(seen, _)| *seen == generation)
            .map(|(_, handler)| Arc::clone(handler))
    });
    if let Some(handler) = cached {
        return Ok(handler);
    }

    let installed = INSTALLED.read()?;
    let handler = Arc::clone(&installed.handler);
    let seen = installed.generation;
    drop(installed);
    LOCAL.with(|local| *local.borrow_mut() = Some((seen, Arc::clone(&handler))));
    Ok(handler)
}

/// External services a handler may be built on.
#[derive(Clone, Default)]
pub struct StateServices {
    pub cache: Option<Arc<dyn SharedCache>>,
    pub broker: Option<Arc<dyn Broker>>,
}

impl StateServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(mut self, cache: Arc<dyn SharedCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }
}
