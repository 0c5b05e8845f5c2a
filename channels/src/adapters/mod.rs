//! Concrete adapter implementations. Each module is `pub(crate)` except its
//! public constructor type (re-exported from `crate::lib`) — adapters must
//! not import each other (spec §4.1 "Contract").

pub(crate) mod discord;
pub(crate) mod imessage;
pub(crate) mod signal;
pub(crate) mod slack;
pub(crate) mod telegram;
pub(crate) mod webchat;
pub(crate) mod whatsapp;

/// Lazily-constructed transport handle behind `gateway.startAccount` (spec
/// §9 "cyclic imports at plugin boundary" redesign: heavy transport/login
/// modules are imported lazily at first use, not at adapter construction).
/// Adapters whose real transport is explicitly out of scope (WhatsApp,
/// Signal, iMessage — concrete channel transports per spec §1) return
/// `NotLinked` until a transport is wired up here.
pub(crate) enum TransportHandle {
    NotLinked,
    #[allow(dead_code)]
    Active(()),
}
