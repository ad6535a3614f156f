pub mod pages;
pub mod widget;
