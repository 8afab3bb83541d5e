//! Message-type tags carried in every envelope.
//!
//! Routes fall into two families: handshake routes (establishment traffic,
//! before the session ciphers exist) and session routes (everything after).
//! A handshake route arriving on an established session, or vice versa, is
//! a protocol error, not a dispatchable message.

/// Closed set of message types. `Invalid` is the sentinel for any
/// out-of-range value decoded from the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Route {
    Invalid = 0,
    Identity = 1,
    RequestHandshake = 2,
    AcceptHandshake = 3,
    FinalizeHandshake = 4,
    SendChallenge = 5,
    VerifyChallenge = 6,
    InitializeDoubleRatchet = 7,
    ConfirmDoubleRatchet = 8,
    ExchangeMessages = 9,
    CloseTransport = 10,
    Reconnect = 11,
}

impl Route {
    /// Anything other than the `Invalid` sentinel may be dispatched.
    pub fn routable(self) -> bool {
        self != Route::Invalid
    }

    /// Establishment traffic: introduction and key agreement.
    pub fn is_handshake(self) -> bool {
        matches!(
            self,
            Route::Identity
                | Route::RequestHandshake
                | Route::AcceptHandshake
                | Route::FinalizeHandshake
        )
    }

    /// Post-handshake traffic on the encrypted transport.
    pub fn is_session(self) -> bool {
        self.routable() && !self.is_handshake()
    }
}

/// Routes an initiator sends, in protocol order, before exchanging payloads.
pub const INITIATOR_SEQUENCE: &[Route] = &[
    Route::Identity,
    Route::RequestHandshake,
    Route::FinalizeHandshake,
    Route::SendChallenge,
    Route::VerifyChallenge,
    Route::InitializeDoubleRatchet,
];

/// Routes a responder sends, in protocol order, before exchanging payloads.
pub const RESPONDER_SEQUENCE: &[Route] = &[
    Route::Identity,
    Route::AcceptHandshake,
    Route::VerifyChallenge,
    Route::SendChallenge,
    Route::ConfirmDoubleRatchet,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families_partition_valid_routes() {
        for value in 0..=11 {
            let route = Route::try_from(value).unwrap();
            if route.routable() {
                assert!(route.is_handshake() != route.is_session(), "{route:?}");
            } else {
                assert!(!route.is_handshake() && !route.is_session());
            }
        }
    }

    #[test]
    fn out_of_range_decodes_to_error() {
        assert!(Route::try_from(99).is_err());
    }

    #[test]
    fn sequences_start_with_introduction() {
        assert_eq!(INITIATOR_SEQUENCE[0], Route::Identity);
        assert_eq!(RESPONDER_SEQUENCE[0], Route::Identity);
    }
}
