pub mod block;
pub mod grid;
pub mod history;
pub mod pool;
pub mod session;
