mod test_server;
