//! Coordination core for SpritePal.
//!
//! Services ([`SessionService`], [`ApplicationStateService`],
//! [`ExtractionService`], [`InjectionService`], [`UiCoordinator`]) hold the
//! business state. A [`ServiceRegistry`] builds the shared instances; the
//! thread-local [`context`] stack overrides them in scoped code. Long
//! operations run on workers from `spritepal-worker`, started by the
//! [`Controller`] with services from a [`ManagerFactory`], so each worker
//! owns the service it drives.

pub mod app_state;
pub mod config;
pub mod context;
pub mod controller;
pub mod dump;
pub mod error;
pub mod extraction;
pub mod factory;
pub mod injection;
pub mod logging;
pub mod notify;
pub mod registry;
pub mod service;
pub mod session;
pub mod settings;
pub mod ui;
pub mod validate;
pub mod workers;

pub use app_state::ApplicationStateService;
pub use config::{ConfigError, SpritePalConfig};
pub use context::{Context, ContextBuilder, ContextGuard};
pub use controller::{Controller, UiEventLoop};
pub use dump::{Backends, DumpExtractor, DumpInjector};
pub use error::{ManagerError, Result};
pub use extraction::{ExtractionService, RomExtractionParams, SpriteExtractor, VramExtractionParams};
pub use factory::{ManagerFactory, OwnedServiceFactory, SingletonFactory};
pub use injection::{InjectionParams, InjectionService, InjectionTarget, SpriteInjector};
pub use registry::ServiceRegistry;
pub use service::{Service, ServiceCore, ServiceEvent, ServiceOwner};
pub use session::SessionService;
pub use settings::SettingsStore;
pub use ui::{MainWindow, UiCoordinator};
pub use workers::{CommandLauncher, EditorLauncher};
