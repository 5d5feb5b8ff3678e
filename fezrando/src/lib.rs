pub mod output;
pub mod randomize;
