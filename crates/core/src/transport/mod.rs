mod ws;

pub use ws::WsTransport;

use crate::{ClientCommand, Result};

/// Open/closed status of the message channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Opening,
    Open,
}

/// Notifications from the channel, delivered through the session's input
/// queue in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Error(String),
    Closed,
}

/// Bidirectional, message-oriented connection to the dialogue service.
pub trait Transport {
    /// Starts opening the channel. Completion is observed through
    /// [`Transport::state`] and a [`TransportEvent::Opened`] event.
    fn open(&mut self) -> Result<()>;
    fn state(&self) -> ChannelState;
    fn send(&mut self, command: &ClientCommand) -> Result<()>;
    fn close(&mut self);
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{cell::RefCell, rc::Rc};

    use super::*;
    use crate::DuetError;

    /// In-memory transport whose state is driven by the test.
    #[derive(Clone)]
    pub struct FakeTransport {
        pub state: Rc<RefCell<ChannelState>>,
        pub sent: Rc<RefCell<Vec<ClientCommand>>>,
        pub opens: Rc<RefCell<usize>>,
        /// State entered when `open` is called.
        pub open_to: ChannelState,
    }

    impl FakeTransport {
        pub fn new(open_to: ChannelState) -> Self {
            Self {
                state: Rc::new(RefCell::new(ChannelState::Closed)),
                sent: Rc::default(),
                opens: Rc::default(),
                open_to,
            }
        }

        pub fn set_state(&self, state: ChannelState) {
            *self.state.borrow_mut() = state;
        }

        pub fn sent(&self) -> Vec<ClientCommand> {
            self.sent.borrow().clone()
        }

        pub fn count(&self, name: &str) -> usize {
            self.sent.borrow().iter().filter(|c| c.name() == name).count()
        }
    }

    impl Transport for FakeTransport {
        fn open(&mut self) -> Result<()> {
            *self.opens.borrow_mut() += 1;
            self.set_state(self.open_to);
            Ok(())
        }

        fn state(&self) -> ChannelState {
            *self.state.borrow()
        }

        fn send(&mut self, command: &ClientCommand) -> Result<()> {
            if self.state() != ChannelState::Open {
                return Err(DuetError::transport("channel is not open"));
            }
            self.sent.borrow_mut().push(command.clone());
            Ok(())
        }

        fn close(&mut self) {
            self.set_state(ChannelState::Closed);
        }
    }
}
