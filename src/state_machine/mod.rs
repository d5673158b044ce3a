pub mod average;
pub mod divisor;
pub mod maximum;
pub mod wrappers;

/// The [`StateMachine`] trait provides calling semantics for the pure computations behind each
/// RPC handler, and for the call lifecycle itself.
///
/// # Functionality
/// A state machine consumes [`Input`](StateMachine::Input) values one at a time through
/// [`process_input`](StateMachine::process_input) and hands results back through
/// [`poll_output`](StateMachine::poll_output). Handlers own a state machine per call and feed it
/// from the inbound direction of that call, draining its output into the outbound direction.
///
/// Keeping the computation behind this seam means the streaming runtime never needs to know what
/// a handler computes, and the computation never needs to know how messages travel.
///
/// When a machine accepts several kinds of input (a sample versus an end-of-stream signal, for
/// example) [`Input`](StateMachine::Input) is an enum, and the same goes for
/// [`Output`](StateMachine::Output). In the single variant case a plain struct or scalar works.
///
/// # Invariants
/// Implementors *must* stay deterministic: the same sequence of inputs always produces the same
/// sequence of outputs.
///
/// ## No Interior Mutability
/// State changes only through `&mut self`. No [`std::cell`] containers, no [`std::sync`] locks and
/// no shared pointers. The caller decides how a machine is shared, typically by giving exactly
/// one task ownership of it.
///
/// ## No IO, Time or Randomness
/// A machine never reads the system clock, entropy or any other process state. When it needs the
/// current time (the call lifecycle does, to evaluate deadlines) the caller passes it in as input;
/// see [`wrappers`] for the input wrapper used for that.
///
/// ## No Async and No Blocking
/// A machine never suspends. [`process_input`](StateMachine::process_input) and
/// [`poll_output`](StateMachine::poll_output) return promptly so they can be called from any
/// suspension loop of a call without stalling the other direction.
///
/// # Side Effects
/// Logging is allowed as long as the machine's logic does not depend on it.
///
/// # Example
/// ```ignore
/// pub struct Counter {
///     total: u64,
///     pending: bool,
/// }
///
/// impl StateMachine for Counter {
///     type Input = u64;
///     type Output = u64;
///
///     fn process_input(&mut self, input: Self::Input) {
///         self.total += input;
///         self.pending = true;
///     }
///
///     fn poll_output(&mut self) -> Option<Self::Output> {
///         std::mem::take(&mut self.pending).then_some(self.total)
///     }
/// }
/// ```
pub trait StateMachine {
    /// The type of input that is [processed](StateMachine::process_input) by the state machine.
    type Input;
    /// The type of output that is [polled](StateMachine::poll_output) from the state machine.
    type Output;

    /// Process the provided `input` into the state machine.
    fn process_input(&mut self, input: Self::Input);

    /// Poll the state machine for output, returning the next available output if present.
    fn poll_output(&mut self) -> Option<Self::Output>;
}
