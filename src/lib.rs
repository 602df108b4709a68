// Single-threaded shared-ownership smart pointers in the mold of
// std::shared_ptr / std::weak_ptr, with pluggable deleters and allocators.
// https://en.cppreference.com/w/cpp/memory/shared_ptr

pub mod control;
pub mod shared_ptr;
pub mod weak_ptr;

pub use control::{ DefaultDelete, Deleter };
pub use shared_ptr::{ allocate_shared, make_shared, SharedPtr };
pub use weak_ptr::WeakPtr;
