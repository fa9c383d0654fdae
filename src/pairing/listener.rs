use crate::domain::models::{MessageSeverity, PairingReport};

/// What the engine requires from its caller. Delivery is fire-and-forget
/// from the engine's perspective: implementations must return promptly and
/// must not re-enter the engine from inside a callback (signalling the
/// cancellation flag through [`super::PairingHandle`] is fine).
pub trait PairingListener: Send + Sync {
    /// A session began.
    fn on_started(&self);

    /// Raw console output, one line at a time.
    fn on_console_line(&self, line: &str);

    /// A categorized, user-facing status message.
    fn on_message(&self, message: &str, severity: MessageSeverity);

    /// A structured progress report. Emitted after every pairing increment
    /// and once at session end.
    fn on_progress(&self, report: &PairingReport);
}
