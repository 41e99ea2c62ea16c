//! Per-conversation refresh state machine.
//!
//! ```text
//!            Trigger                Elapsed
//!   Idle ─────────────► Debouncing ─────────► Fetching
//!    ▲                   │  ▲  │                │  ▲
//!    │       Cancel      │  └──┘ Trigger        │  └── Trigger (dropped)
//!    ├───────────────────┘                      │
//!    │                 Completed                │
//!    └──────────────────────────────────────────┘
//! ```
//!
//! A trigger while debouncing restarts the timer. A trigger while fetching is
//! absorbed, so at most one fetch per conversation is in flight.

use rust_fsm::*;

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub refresh_machine(Idle)

    Idle => {
        Trigger => Debouncing
    },
    Debouncing => {
        Trigger => Debouncing,
        Elapsed => Fetching,
        Cancel => Idle
    },
    Fetching => {
        Trigger => Fetching,
        Completed => Idle
    }
}

pub use refresh_machine::Input as RefreshInput;
pub use refresh_machine::State as RefreshState;
pub use refresh_machine::StateMachine as RefreshMachine;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_is_idle() {
        let machine = RefreshMachine::new();
        assert_eq!(*machine.state(), RefreshState::Idle);
    }

    #[test]
    fn full_cycle() {
        let mut machine = RefreshMachine::new();

        machine.consume(&RefreshInput::Trigger).unwrap();
        assert_eq!(*machine.state(), RefreshState::Debouncing);

        machine.consume(&RefreshInput::Trigger).unwrap();
        assert_eq!(*machine.state(), RefreshState::Debouncing);

        machine.consume(&RefreshInput::Elapsed).unwrap();
        assert_eq!(*machine.state(), RefreshState::Fetching);

        machine.consume(&RefreshInput::Trigger).unwrap();
        assert_eq!(*machine.state(), RefreshState::Fetching);

        machine.consume(&RefreshInput::Completed).unwrap();
        assert_eq!(*machine.state(), RefreshState::Idle);
    }

    #[test]
    fn cancel_while_debouncing() {
        let mut machine = RefreshMachine::new();
        machine.consume(&RefreshInput::Trigger).unwrap();
        machine.consume(&RefreshInput::Cancel).unwrap();
        assert_eq!(*machine.state(), RefreshState::Idle);
    }

    #[test]
    fn impossible_transitions_are_rejected() {
        let mut machine = RefreshMachine::new();
        assert!(machine.consume(&RefreshInput::Elapsed).is_err());
        assert!(machine.consume(&RefreshInput::Completed).is_err());
        assert_eq!(*machine.state(), RefreshState::Idle);

        machine.consume(&RefreshInput::Trigger).unwrap();
        machine.consume(&RefreshInput::Elapsed).unwrap();
        assert!(machine.consume(&RefreshInput::Cancel).is_err());
        assert_eq!(*machine.state(), RefreshState::Fetching);
    }
}
