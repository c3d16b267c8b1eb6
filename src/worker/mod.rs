//! The two worker-side components of spec §4: the bounded connection
//! multiplexer ([`pool`], spec §4.3) and the process that hosts it
//! ([`process`], spec §4.4).

pub(crate) mod pool;
pub(crate) mod process;
