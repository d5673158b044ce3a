/// The [`SystemResource`] trait indicates that a type is a resource inherently provided by the
/// system context of the application, such as the clock.
///
/// Runners that own a [`StateMachine`](crate::state_machine::StateMachine) call
/// [`generate`](SystemResource::generate) at the point where the machine needs the resource and
/// pass the result in through [`SystemInput::System`].
pub trait SystemResource {
    /// Produce an instance of this resource from the implicit system context.
    fn generate() -> Self;
}

impl SystemResource for tokio::time::Instant {
    fn generate() -> Self {
        tokio::time::Instant::now()
    }
}

/// A [`StateMachine`](crate::state_machine::StateMachine) input wrapper that carries either a
/// regular input `I` or a system resource `S`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemInput<I, S> {
    Input(I),
    System(S),
}

impl<I, S: SystemResource> SystemInput<I, S> {
    /// Sample the system resource now.
    pub fn sample() -> Self {
        SystemInput::System(S::generate())
    }
}
