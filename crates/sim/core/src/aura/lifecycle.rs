//! Aura transitions driven through the clock.
//!
//! State is updated before any hook runs, so a hook always observes the
//! aura in its post-transition state, and re-entrant calls from inside a
//! hook see consistent values.
//!
//! Hooks stay paired when they re-enter. `on_stack_change` always reports
//! from the last reported count to the current one, and each `on_gain` is
//! followed by exactly one `on_expire` before the next `on_gain`. A
//! deactivation from inside `on_gain` therefore yields
//! `gain, 0→1, 1→0, expire`.

use std::time::Duration;

use tracing::trace;

use crate::clock::{SimulationClock, deadline};
use crate::error::SimError;
use crate::event::SimEvent;

use super::{Aura, AuraDescriptor, AuraHandle, HookKind, RefreshPolicy};
use crate::unit::UnitId;

impl SimulationClock {
    /// Registers an aura. It starts inactive.
    pub fn register_aura(&mut self, descriptor: AuraDescriptor) -> Result<AuraHandle, SimError> {
        self.units.get(descriptor.unit)?;
        let handle = self.auras.register(descriptor)?;
        self.lifecycle.push_aura(handle);
        Ok(handle)
    }

    /// Returns the aura with the descriptor's label on its unit, registering
    /// it first if needed.
    pub fn get_or_register_aura(
        &mut self,
        descriptor: AuraDescriptor,
    ) -> Result<AuraHandle, SimError> {
        match self.auras.find(descriptor.unit, &descriptor.label) {
            Some(handle) => Ok(handle),
            None => self.register_aura(descriptor),
        }
    }

    pub fn aura(&self, handle: AuraHandle) -> Result<&Aura, SimError> {
        self.auras.get(handle)
    }

    pub fn aura_by_label(&self, unit: UnitId, label: &str) -> Option<AuraHandle> {
        self.auras.find(unit, label)
    }

    pub fn is_active(&self, handle: AuraHandle) -> Result<bool, SimError> {
        Ok(self.auras.get(handle)?.active)
    }

    pub fn stacks(&self, handle: AuraHandle) -> Result<u32, SimError> {
        Ok(self.auras.get(handle)?.stacks)
    }

    pub fn expires_at(&self, handle: AuraHandle) -> Result<Option<Duration>, SimError> {
        Ok(self.auras.get(handle)?.expires_at)
    }

    pub fn remaining_duration(&self, handle: AuraHandle) -> Result<Option<Duration>, SimError> {
        Ok(self.auras.get(handle)?.remaining(self.now))
    }

    /// Activates the aura at the current time, or refreshes it when already
    /// active. `on_gain` fires only on the Inactive→Active edge.
    pub fn activate(&mut self, handle: AuraHandle) -> Result<(), SimError> {
        if self.auras.get(handle)?.active {
            return self.refresh(handle);
        }
        self.gain(handle, 1)
    }

    /// Resets the expiry of an active aura to `now + duration` and applies
    /// its refresh policy to the stack count. Inactive auras are activated.
    pub fn refresh(&mut self, handle: AuraHandle) -> Result<(), SimError> {
        let now = self.now;
        let aura = self.auras.get_mut(handle)?;
        if !aura.active {
            return self.gain(handle, 1);
        }

        let expires_at = aura.duration.map(|duration| deadline(now, duration)).transpose()?;
        let previous_expiry = aura.expires_at;
        aura.stacks = match aura.refresh {
            RefreshPolicy::KeepStacks => aura.stacks,
            RefreshPolicy::ResetToOne => 1,
            RefreshPolicy::ResetToMax => aura.stack_limit(),
        };
        aura.expires_at = expires_at;
        aura.metrics.refreshes += 1;
        trace!(aura = %aura.label, ?expires_at, stacks = aura.stacks, "aura refreshed");

        if let Some(at) = expires_at.filter(|&at| Some(at) != previous_expiry) {
            self.schedule_expiry(handle, at)?;
        }
        self.report_stacks(handle)
    }

    /// Removes the aura. `on_expire` fires exactly once per activation;
    /// deactivating an inactive aura does nothing.
    pub fn deactivate(&mut self, handle: AuraHandle) -> Result<(), SimError> {
        if !self.auras.get(handle)?.active {
            return Ok(());
        }
        // Called from inside `on_gain`: the gain's stack change goes out first.
        self.report_stacks(handle)?;

        let now = self.now;
        let aura = self.auras.get_mut(handle)?;
        if !aura.active {
            return Ok(());
        }
        aura.active = false;
        aura.stacks = 0;
        aura.expires_at = None;
        aura.metrics.uptime += now.saturating_sub(aura.gained_at);
        trace!(aura = %aura.label, "aura expired");

        self.report_stacks(handle)?;
        self.settle_expire(handle)
    }

    pub fn add_stack(&mut self, handle: AuraHandle) -> Result<(), SimError> {
        let stacks = self.auras.get(handle)?.stacks;
        self.set_stacks(handle, stacks.saturating_add(1))
    }

    pub fn remove_stack(&mut self, handle: AuraHandle) -> Result<(), SimError> {
        let stacks = self.auras.get(handle)?.stacks;
        self.set_stacks(handle, stacks.saturating_sub(1))
    }

    /// Sets the stack count, clamped to `[0, stack_limit]`.
    ///
    /// Crossing from 0 activates the aura (`on_gain`, then `on_stack_change`);
    /// reaching 0 deactivates it (`on_stack_change`, then `on_expire`). Stack
    /// changes never touch the expiry time.
    pub fn set_stacks(&mut self, handle: AuraHandle, stacks: u32) -> Result<(), SimError> {
        let aura = self.auras.get_mut(handle)?;
        let new = stacks.min(aura.stack_limit());
        let old = aura.stacks;
        if new == old {
            return Ok(());
        }
        if old == 0 {
            return self.gain(handle, new);
        }
        if new == 0 {
            return self.deactivate(handle);
        }
        aura.stacks = new;
        trace!(aura = %aura.label, old, new, "aura stacks changed");
        self.report_stacks(handle)
    }

    /// Inactive→Active transition with an initial stack count.
    fn gain(&mut self, handle: AuraHandle, stacks: u32) -> Result<(), SimError> {
        // Reactivated from inside the previous activation's `on_stack_change`.
        self.settle_expire(handle)?;

        let now = self.now;
        let aura = self.auras.get_mut(handle)?;
        if aura.active {
            return Ok(());
        }
        let expires_at = aura.duration.map(|duration| deadline(now, duration)).transpose()?;
        aura.active = true;
        aura.stacks = stacks.clamp(1, aura.stack_limit());
        aura.gained_at = now;
        aura.expires_at = expires_at;
        aura.expire_owed = true;
        aura.metrics.activations += 1;
        trace!(aura = %aura.label, ?expires_at, stacks = aura.stacks, "aura gained");

        if let Some(at) = expires_at {
            self.schedule_expiry(handle, at)?;
        }
        self.fire_lifecycle(handle, HookKind::Gain)?;
        self.report_stacks(handle)
    }

    fn schedule_expiry(&mut self, handle: AuraHandle, at: Duration) -> Result<(), SimError> {
        self.schedule(at, move |clock| clock.expire_if_due(handle))
    }

    /// Fires for every expiry ever scheduled; stale ones fall through.
    fn expire_if_due(&mut self, handle: AuraHandle) -> Result<(), SimError> {
        let aura = self.auras.get(handle)?;
        let due = aura.active && aura.expires_at.is_some_and(|at| at <= self.now);
        if due {
            self.deactivate(handle)?;
        }
        Ok(())
    }

    pub(crate) fn fire_lifecycle(
        &mut self,
        handle: AuraHandle,
        kind: HookKind,
    ) -> Result<(), SimError> {
        let aura = self.auras.get(handle)?;
        let Some(hook) = aura.hooks.lifecycle(kind) else {
            return Ok(());
        };
        let label = aura.label.clone();
        self.invoke_hook(&label, kind, |clock| hook(clock, handle))
    }

    /// Reports the difference between the last reported and the current
    /// stack count to `on_stack_change`, if any.
    ///
    /// Reporting from state rather than from the caller's view keeps the
    /// sequence of `(old, new)` pairs contiguous when hooks re-enter.
    fn report_stacks(&mut self, handle: AuraHandle) -> Result<(), SimError> {
        let aura = self.auras.get_mut(handle)?;
        let (old, new) = (aura.reported_stacks, aura.stacks);
        if old == new {
            return Ok(());
        }
        aura.reported_stacks = new;
        let Some(hook) = aura.hooks.on_stack_change.clone() else {
            return Ok(());
        };
        let label = aura.label.clone();
        self.invoke_hook(&label, HookKind::StackChange, |clock| {
            hook(clock, handle, old, new)
        })
    }

    /// Fires the `on_expire` owed by an activation that has ended.
    fn settle_expire(&mut self, handle: AuraHandle) -> Result<(), SimError> {
        let aura = self.auras.get_mut(handle)?;
        if aura.active || !aura.expire_owed {
            return Ok(());
        }
        aura.expire_owed = false;
        self.fire_lifecycle(handle, HookKind::Expire)
    }

    /// Runs the matching event hook of every aura on the event's source unit,
    /// active or not, in registration order.
    pub(crate) fn dispatch_to_auras(&mut self, event: &SimEvent) -> Result<(), SimError> {
        let handles = self.auras.on_unit(event.source()).to_vec();
        for handle in handles {
            let aura = self.auras.get(handle)?;
            let Some((kind, hook)) = aura.hooks.for_event(event) else {
                continue;
            };
            let label = aura.label.clone();
            self.invoke_hook(&label, kind, |clock| hook(clock, handle, event))?;
        }
        Ok(())
    }

    /// Deactivates every active aura, firing `on_expire`, in registration order.
    pub(crate) fn expire_all(&mut self) -> Result<(), SimError> {
        let active: Vec<AuraHandle> = self
            .auras
            .iter()
            .filter(|aura| aura.active)
            .map(|aura| aura.handle)
            .collect();
        for handle in active {
            self.deactivate(handle)?;
        }
        Ok(())
    }

    pub(crate) fn reset_aura(&mut self, handle: AuraHandle) -> Result<(), SimError> {
        self.fire_lifecycle(handle, HookKind::Reset)?;
        if self.auras.get(handle)?.permanent {
            self.activate(handle)?;
        }
        Ok(())
    }

    pub(crate) fn init_aura(&mut self, handle: AuraHandle) -> Result<(), SimError> {
        self.fire_lifecycle(handle, HookKind::Init)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::unit::UnitSpec;

    type Log = Rc<RefCell<Vec<String>>>;

    fn recording(clock: &mut SimulationClock, descriptor: AuraDescriptor) -> (AuraHandle, Log) {
        let log: Log = Rc::default();
        let (gain, expire, stacks) = (log.clone(), log.clone(), log.clone());
        let handle = clock
            .register_aura(
                descriptor
                    .on_gain(move |_, _| {
                        gain.borrow_mut().push("gain".into());
                        Ok(())
                    })
                    .on_expire(move |_, _| {
                        expire.borrow_mut().push("expire".into());
                        Ok(())
                    })
                    .on_stack_change(move |_, _, old, new| {
                        stacks.borrow_mut().push(format!("stacks {old}->{new}"));
                        Ok(())
                    }),
            )
            .unwrap();
        (handle, log)
    }

    fn clock_with_player() -> (SimulationClock, UnitId) {
        let mut clock = SimulationClock::new(1);
        let player = clock.add_unit(UnitSpec::new("player"));
        (clock, player)
    }

    #[test]
    fn gain_then_stack_change_then_reverse_on_removal() {
        let (mut clock, player) = clock_with_player();
        let (aura, log) = recording(
            &mut clock,
            AuraDescriptor::new(player, "Stacker", RefreshPolicy::KeepStacks).max_stacks(3),
        );

        clock.add_stack(aura).unwrap();
        clock.add_stack(aura).unwrap();
        clock.set_stacks(aura, 0).unwrap();

        assert_eq!(
            *log.borrow(),
            vec!["gain", "stacks 0->1", "stacks 1->2", "stacks 2->0", "expire"]
        );
        assert!(!clock.is_active(aura).unwrap());
    }

    #[test]
    fn stacks_clamp_silently() {
        let (mut clock, player) = clock_with_player();
        let (aura, log) = recording(
            &mut clock,
            AuraDescriptor::new(player, "Capped", RefreshPolicy::KeepStacks).max_stacks(2),
        );
        for _ in 0..5 {
            clock.add_stack(aura).unwrap();
        }
        assert_eq!(clock.stacks(aura).unwrap(), 2);
        for _ in 0..5 {
            clock.remove_stack(aura).unwrap();
        }
        assert_eq!(clock.stacks(aura).unwrap(), 0);
        assert_eq!(log.borrow().iter().filter(|e| *e == "gain").count(), 1);
        assert_eq!(log.borrow().iter().filter(|e| *e == "expire").count(), 1);
    }

    #[test]
    fn refresh_policies_apply_to_stacks() {
        let (mut clock, player) = clock_with_player();
        let to_max = clock
            .register_aura(
                AuraDescriptor::new(player, "max", RefreshPolicy::ResetToMax).max_stacks(4),
            )
            .unwrap();
        let to_one = clock
            .register_aura(
                AuraDescriptor::new(player, "one", RefreshPolicy::ResetToOne).max_stacks(4),
            )
            .unwrap();

        for aura in [to_max, to_one] {
            clock.activate(aura).unwrap();
            clock.set_stacks(aura, 3).unwrap();
            clock.activate(aura).unwrap();
        }
        assert_eq!(clock.stacks(to_max).unwrap(), 4);
        assert_eq!(clock.stacks(to_one).unwrap(), 1);
    }

    #[test]
    fn deactivating_twice_expires_once() {
        let (mut clock, player) = clock_with_player();
        let (aura, log) = recording(
            &mut clock,
            AuraDescriptor::new(player, "Once", RefreshPolicy::KeepStacks),
        );
        clock.activate(aura).unwrap();
        clock.deactivate(aura).unwrap();
        clock.deactivate(aura).unwrap();
        assert_eq!(*log.borrow(), vec!["gain", "stacks 0->1", "stacks 1->0", "expire"]);
    }
}
