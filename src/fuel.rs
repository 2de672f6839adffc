//! Fuel accounting.
//!
//! When metering is enabled every context carries a fuel counter. Guest code
//! burns fuel as it runs and traps with [`TrapCode::OutOfFuel`] once the
//! counter hits zero; the host can read, add and consume fuel explicitly.
//! A call made while the counter is already zero is refused before the guest
//! is entered.
//!
//! [`TrapCode::OutOfFuel`]: crate::TrapCode::OutOfFuel

use crate::context::ContextData;
use crate::{AsContext, AsContextMut, Context, Error, HostCaller, Result, UsageError};
use wasmtime::StoreContextMut;

fn ensure_metered(data: &ContextData) -> Result<()> {
    if data.metering() {
        Ok(())
    } else {
        Err(UsageError::FuelNotEnabled.into())
    }
}

fn remaining<C: AsContext + ?Sized>(cx: &C) -> Result<u64> {
    let store = cx.store_context()?;
    ensure_metered(store.data())?;
    Ok(store.get_fuel()?)
}

fn add<C: AsContextMut + ?Sized>(cx: &mut C, amount: u64) -> Result<u64> {
    let mut store = cx.store_context_mut()?;
    ensure_metered(store.data())?;
    let fuel = store.get_fuel()?.saturating_add(amount);
    store.set_fuel(fuel)?;
    log::trace!("added {amount} fuel, {fuel} remaining");
    Ok(fuel)
}

fn consume<C: AsContextMut + ?Sized>(cx: &mut C, amount: u64) -> Result<u64> {
    let mut store = cx.store_context_mut()?;
    ensure_metered(store.data())?;
    let remaining = store.get_fuel()?;
    if amount > remaining {
        return Err(Error::FuelOverflow {
            requested: amount,
            remaining,
        });
    }
    let fuel = remaining - amount;
    store.set_fuel(fuel)?;
    Ok(fuel)
}

/// Refuses to enter guest code with an empty tank.
pub(crate) fn check_before_entry(store: &StoreContextMut<'_, ContextData>) -> Result<()> {
    if !store.data().metering() {
        return Ok(());
    }
    if store.get_fuel()? == 0 {
        log::debug!("refusing to enter guest code without fuel");
        return Err(Error::OutOfFuel);
    }
    Ok(())
}

impl Context {
    /// The fuel left in this context.
    ///
    /// # Errors
    ///
    /// Fails with [`UsageError::FuelNotEnabled`] if the engine was created
    /// without fuel metering.
    pub fn fuel(&self) -> Result<u64> {
        remaining(self)
    }

    /// Adds `amount` fuel, saturating at `u64::MAX`, and returns the new
    /// total.
    pub fn add_fuel(&mut self, amount: u64) -> Result<u64> {
        add(self, amount)
    }

    /// Removes `amount` fuel and returns what is left.
    ///
    /// Asking for more than remains fails with [`Error::FuelOverflow`] and
    /// leaves the counter untouched.
    pub fn consume_fuel(&mut self, amount: u64) -> Result<u64> {
        consume(self, amount)
    }
}

impl HostCaller<'_> {
    /// The fuel left in the calling context.
    pub fn fuel(&self) -> Result<u64> {
        remaining(self)
    }

    /// Same as [`Context::add_fuel`].
    pub fn add_fuel(&mut self, amount: u64) -> Result<u64> {
        add(self, amount)
    }

    /// Same as [`Context::consume_fuel`].
    pub fn consume_fuel(&mut self, amount: u64) -> Result<u64> {
        consume(self, amount)
    }
}
