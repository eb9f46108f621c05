mod tests_basic;
mod tests_multi;
