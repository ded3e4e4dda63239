mod bbox;

pub use bbox::Box3;
