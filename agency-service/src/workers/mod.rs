pub mod overdue;

pub use overdue::OverdueSweeper;
