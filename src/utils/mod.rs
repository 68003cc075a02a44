pub mod auth;
pub mod fs;
#[cfg(test)]
pub mod test_utils;
pub mod url;
