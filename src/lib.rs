//! overlapped-aio - completion-port driven asynchronous disk IO
//!
//! Features:
//! - Submit now, harvest later: a min/max/timeout polling contract
//! - One completion listener thread per open target
//! - IOCP on Windows, positional IO with an in-process port elsewhere

pub mod io;
