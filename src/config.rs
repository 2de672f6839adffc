use crate::{Result, UsageError};
use serde_derive::Deserialize;

/// Engine-wide settings, fixed once an [`Engine`](crate::Engine) is built
/// from them.
///
/// A `Config` is built either with the setter methods or from TOML, where
/// option names are the kebab-case forms of the setters:
///
/// ```
/// use wasmtime_bind::Config;
///
/// let config = Config::from_toml(r#"
///     consume-fuel = true
///     initial-fuel = 10000
///     max-wasm-stack = 1048576
/// "#)?;
/// assert_eq!(config, Config::new().consume_fuel(true).initial_fuel(Some(10_000)).max_wasm_stack(Some(1 << 20)).clone());
/// # Ok::<(), wasmtime_bind::Error>(())
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "kebab-case")]
pub struct Config {
    pub(crate) consume_fuel: bool,
    pub(crate) async_support: bool,
    pub(crate) epoch_interruption: bool,
    pub(crate) wasm_backtrace: bool,
    pub(crate) max_wasm_stack: Option<usize>,
    pub(crate) async_yield_interval: Option<u64>,
    pub(crate) initial_fuel: Option<u64>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            consume_fuel: false,
            async_support: false,
            epoch_interruption: false,
            wasm_backtrace: true,
            max_wasm_stack: None,
            async_yield_interval: None,
            initial_fuel: None,
        }
    }
}

impl Config {
    /// The default configuration: no fuel metering, no async support,
    /// backtraces on.
    pub fn new() -> Config {
        Config::default()
    }

    /// Parses a configuration from TOML and validates it.
    pub fn from_toml(text: &str) -> Result<Config> {
        let config: Config =
            toml::from_str(text).map_err(|e| UsageError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Enables fuel metering.
    pub fn consume_fuel(&mut self, enable: bool) -> &mut Self {
        self.consume_fuel = enable;
        self
    }

    /// Enables async host functions and async calls. Contexts of an engine
    /// with async support only accept the `*_async` call and instantiation
    /// methods.
    pub fn async_support(&mut self, enable: bool) -> &mut Self {
        self.async_support = enable;
        self
    }

    /// Enables interrupting guest code through
    /// [`Engine::increment_epoch`](crate::Engine::increment_epoch).
    pub fn epoch_interruption(&mut self, enable: bool) -> &mut Self {
        self.epoch_interruption = enable;
        self
    }

    /// Whether traps record the guest frames they unwound.
    pub fn wasm_backtrace(&mut self, enable: bool) -> &mut Self {
        self.wasm_backtrace = enable;
        self
    }

    /// Limits the native stack guest code may use, in bytes.
    pub fn max_wasm_stack(&mut self, size: Option<usize>) -> &mut Self {
        self.max_wasm_stack = size;
        self
    }

    /// With both fuel metering and async support on, makes async calls
    /// yield to the executor every `interval` units of fuel.
    pub fn async_yield_interval(&mut self, interval: Option<u64>) -> &mut Self {
        self.async_yield_interval = interval;
        self
    }

    /// Fuel every new context starts with. Requires fuel metering.
    pub fn initial_fuel(&mut self, fuel: Option<u64>) -> &mut Self {
        self.initial_fuel = fuel;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| -> Result<()> { Err(UsageError::Config(msg.to_string()).into()) };
        if self.initial_fuel.is_some() && !self.consume_fuel {
            return invalid("`initial-fuel` requires `consume-fuel`");
        }
        if self.async_yield_interval.is_some() && !(self.consume_fuel && self.async_support) {
            return invalid("`async-yield-interval` requires `consume-fuel` and `async-support`");
        }
        if self.async_yield_interval == Some(0) {
            return invalid("`async-yield-interval` must be positive");
        }
        if self.async_support && !cfg!(feature = "async") {
            return invalid("`async-support` requires the `async` feature");
        }
        if self.max_wasm_stack == Some(0) {
            return invalid("`max-wasm-stack` must be positive");
        }
        Ok(())
    }

    pub(crate) fn to_wasmtime(&self) -> Result<wasmtime::Config> {
        self.validate()?;
        let mut config = wasmtime::Config::new();
        config
            .consume_fuel(self.consume_fuel)
            .epoch_interruption(self.epoch_interruption)
            .wasm_backtrace(self.wasm_backtrace);
        #[cfg(feature = "async")]
        config.async_support(self.async_support);
        if let Some(size) = self.max_wasm_stack {
            config.max_wasm_stack(size);
        }
        log::debug!("engine configuration: {self:?}");
        Ok(config)
    }
}
