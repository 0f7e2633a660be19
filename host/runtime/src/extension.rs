//! The Extension trait - user logic hosted by the runtime.

use async_trait::async_trait;

use crate::command::Command;
use crate::env::ExtensionEnv;
use crate::error::Result;

/// A unit of user logic with its own properties and lifecycle.
///
/// The runtime calls exactly one of these methods at a time for a given
/// instance, in phase order:
///
/// 1. `on_configure` - load initial properties (`init_property_from_json`)
/// 2. `on_init` - set properties, acquire resources
/// 3. `on_start` - the instance is live; commands may arrive after this
/// 4. `on_cmd` - once per inbound command
/// 5. `on_stop` - stop was requested
/// 6. `on_deinit` - release resources; always called, even after a failure
///
/// Callbacks may await timers, I/O or nested commands without blocking
/// other instances. An error from a phase callback tears the instance down
/// through `Fatal`; an error from `on_cmd` only fails that command.
///
/// # Example
///
/// ```ignore
/// struct Echo;
///
/// #[async_trait::async_trait]
/// impl Extension for Echo {
///     async fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Command) -> Result<()> {
///         let payload = cmd.payload.clone();
///         env.return_result(CommandResult::ok(&cmd, payload)).await
///     }
/// }
/// ```
#[async_trait]
pub trait Extension: Send + 'static {
    async fn on_configure(&mut self, _env: &mut ExtensionEnv) -> Result<()> {
        Ok(())
    }

    async fn on_init(&mut self, _env: &mut ExtensionEnv) -> Result<()> {
        Ok(())
    }

    async fn on_start(&mut self, _env: &mut ExtensionEnv) -> Result<()> {
        Ok(())
    }

    /// Handle one inbound command.
    ///
    /// The handler answers with [`ExtensionEnv::return_result`]. If it
    /// returns without answering, the runtime answers with an error result.
    async fn on_cmd(&mut self, env: &mut ExtensionEnv, cmd: Command) -> Result<()>;

    async fn on_stop(&mut self, _env: &mut ExtensionEnv) -> Result<()> {
        Ok(())
    }

    async fn on_deinit(&mut self, _env: &mut ExtensionEnv) -> Result<()> {
        Ok(())
    }
}
