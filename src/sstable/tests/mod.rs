mod tests_iterators;
