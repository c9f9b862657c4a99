pub mod aws;
#[cfg(test)]
pub mod memory;
