mod tests_ttl;
