//!  The ping log keeps one plain-text file per tracked user.
//!  The basic idea is:
//!   - Every record line starts with a unix timestamp in seconds and is
//!     padded so a human-readable wall-clock column lines up on the right.
//!   - Lines are kept in ascending timestamp order even when records arrive
//!     late, by splicing them in at the right offset instead of rewriting
//!     the whole file.
//!   - Missed pings are backfilled as `RETRO` entries bounded by a cutoff.

pub mod backfill;
pub mod store;
