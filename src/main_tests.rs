// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `main.rs` - signal handling

#[cfg(test)]
mod tests {
    use crate::shutdown_signal;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Test that SIGTERM signal handler can be created on Unix platforms
    #[tokio::test]
    #[cfg(unix)]
    async fn test_sigterm_signal_handler_creation() {
        use tokio::signal::unix::{signal, SignalKind};

        let result = signal(SignalKind::terminate());
        assert!(
            result.is_ok(),
            "Should be able to create SIGTERM signal handler"
        );
    }

    /// The shutdown future stays pending while no signal arrives
    #[tokio::test]
    async fn test_shutdown_signal_waits_for_signal() {
        let result = timeout(Duration::from_millis(100), shutdown_signal()).await;
        assert!(
            result.is_err(),
            "shutdown_signal() should not resolve without a signal"
        );
    }
}
