pub mod inline_str;
