//! The verification core: contract IR, analysis passes, IVL emission, and
//! error back-mapping.

pub mod annotate;
pub mod ast;
pub mod backend;
pub mod ivl;
pub mod messages;
pub mod positions;
pub mod rules;
pub mod symbols;
pub mod translation;
pub mod types;

/// Special names of the contract source language.
pub mod names {
    pub const SELF: &str = "self";
    pub const MSG: &str = "msg";
    pub const BLOCK: &str = "block";
    pub const MSG_SENDER: &str = "sender";
    pub const MSG_VALUE: &str = "value";
    pub const BLOCK_TIMESTAMP: &str = "timestamp";
    pub const SELF_BALANCE: &str = "balance";
    pub const WEI: &str = "wei";
    pub const INIT: &str = "__init__";

    // Specification and body built-ins.
    pub const MIN: &str = "min";
    pub const MAX: &str = "max";
    pub const RANGE: &str = "range";
    pub const SUM: &str = "sum";
    pub const IMPLIES: &str = "implies";
    pub const SUCCESS: &str = "success";
    pub const RESULT: &str = "result";
    pub const CLEAR: &str = "clear";
    pub const LEN: &str = "len";

    // Resource/allocation ghost built-ins.
    pub const ALLOCATED: &str = "allocated";
    pub const OFFERED: &str = "offered";
    pub const TRUSTED: &str = "trusted";
    pub const ACCESSIBLE: &str = "accessible";
    pub const ALLOCATE: &str = "allocate";
    pub const REALLOCATE: &str = "reallocate";
    pub const EXCHANGE: &str = "exchange";
    pub const OFFER: &str = "offer";
    pub const TRUST: &str = "trust";
    pub const CREATOR: &str = "creator";

    /// Keyword names used by ghost built-ins.
    pub const KW_TO: &str = "to";
    pub const KW_BY: &str = "by";
    pub const KW_WHERE: &str = "where";
    pub const KW_TIMES: &str = "times";

    /// True for names bound by built-in ghost state rather than the user.
    pub fn is_ghost_builtin(name: &str) -> bool {
        matches!(
            name,
            ALLOCATED | OFFERED | TRUSTED | ACCESSIBLE | ALLOCATE | REALLOCATE | EXCHANGE | OFFER
                | TRUST | CREATOR
        )
    }
}
