use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::{TimerId, TimerWheel};

/// A timer payload: something the wheel can fire.
///
/// `fire` receives the wheel itself, so a callback may schedule, cancel,
/// or deregister any timer, including the one currently firing. The
/// firing timer is detached and its payload moved out of the wheel before
/// `fire` runs, so no aliasing is possible.
pub trait Timer: Sized {
    fn fire(&mut self, wheel: &mut TimerWheel<Self>, id: TimerId);
}

/// Boxed-closure timer for heterogeneous or capturing callbacks.
///
/// This is the general-purpose payload: one heap allocation per timer at
/// construction, none afterwards. Where the callback is a method on a
/// known, stably-addressed object, prefer [`MemberTimer`], which stores a
/// plain fn pointer instead.
pub struct Callback(Box<dyn FnMut(&mut TimerWheel<Callback>, TimerId)>);

impl Callback {
    pub fn new(f: impl FnMut(&mut TimerWheel<Callback>, TimerId) + 'static) -> Self {
        Self(Box::new(f))
    }
}

impl Timer for Callback {
    fn fire(&mut self, wheel: &mut TimerWheel<Self>, id: TimerId) {
        (self.0)(wheel, id);
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

/// Timer bound to a fixed method of a shared owner object.
///
/// Stores the owner's shared address and a plain `fn` pointer; invocation
/// dispatches straight to `method(&mut owner)` with no boxed callable.
/// The owner must not be mutably borrowed at the tick its timer fires.
pub struct MemberTimer<O> {
    owner: Rc<RefCell<O>>,
    method: fn(&mut O),
}

impl<O> MemberTimer<O> {
    pub fn new(owner: Rc<RefCell<O>>, method: fn(&mut O)) -> Self {
        Self { owner, method }
    }
}

impl<O> Timer for MemberTimer<O> {
    fn fire(&mut self, _wheel: &mut TimerWheel<Self>, _id: TimerId) {
        (self.method)(&mut self.owner.borrow_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Owner with two timers bound to different methods, mirroring the
    // "connection object embeds its timeout timers" usage pattern.
    struct Session {
        count: u32,
    }

    impl Session {
        fn on_inc(&mut self) {
            self.count += 1;
        }

        fn on_reset(&mut self) {
            self.count = 0;
        }
    }

    #[test]
    fn test_member_timer_dispatch() {
        let mut wheel: TimerWheel<MemberTimer<Session>> = TimerWheel::new();
        let session = Rc::new(RefCell::new(Session { count: 0 }));

        let inc = wheel.register(MemberTimer::new(Rc::clone(&session), Session::on_inc));
        let reset = wheel.register(MemberTimer::new(Rc::clone(&session), Session::on_reset));

        wheel.schedule(inc, 10).unwrap();
        wheel.schedule(reset, 15).unwrap();

        assert_eq!(session.borrow().count, 0);
        wheel.advance(10);
        assert_eq!(session.borrow().count, 1);
        wheel.advance(5);
        assert_eq!(session.borrow().count, 0);
    }

    #[test]
    fn test_member_timer_rearm() {
        let mut wheel: TimerWheel<MemberTimer<Session>> = TimerWheel::new();
        let session = Rc::new(RefCell::new(Session { count: 0 }));

        let inc = wheel.register(MemberTimer::new(Rc::clone(&session), Session::on_inc));

        for _ in 0..4 {
            wheel.schedule(inc, 3).unwrap();
            wheel.advance(3);
        }

        assert_eq!(session.borrow().count, 4);
        assert!(!wheel.active(inc));
    }
}
