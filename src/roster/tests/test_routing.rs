use crate::roster::routing::{from_sysinfo, parse_hosts};
use crate::roster::{Host, SysInfo};

const HOSTS_FILE: &str = "\
# OLSR hosts, autogenerated\n\
\n\
10.0.0.1\t100\t# myself\n\
10.0.0.2\t200 # dtdlink\n\
10.0.0.3\tnode-a # not a phone\n\
10.0.0.4\t4100\t#\n\
garbage line without structure\n";

#[test]
fn test_parse_hosts_keeps_only_numbers() {
    let map = parse_hosts(HOSTS_FILE);
    assert_eq!(map.len(), 3);
    assert!(map.contains_key("100"));
    assert!(map.contains_key("200"));
    assert!(map.contains_key("4100"));
    // hostnames with letters never enter the routing map
    assert!(!map.contains_key("node-a"));

    let record = &map["100"];
    assert_eq!(record.ip, "10.0.0.1");
    assert_eq!(record.hostname, "100");
    assert_eq!(record.comment, "myself");

    assert_eq!(map["4100"].comment, "");
}

#[test]
fn test_parse_hosts_skips_comments_and_blanks() {
    let map = parse_hosts("# only a comment\n\n   \n");
    assert!(map.is_empty());
}

#[test]
fn test_from_sysinfo_applies_same_filter() {
    let sysinfo = SysInfo {
        hosts: vec![
            Host {
                name: "100".to_string(),
                ip: "10.0.0.1".to_string(),
            },
            Host {
                name: "node-a".to_string(),
                ip: "10.0.0.2".to_string(),
            },
            Host {
                name: "4100".to_string(),
                ip: "10.0.0.3".to_string(),
            },
        ],
        ..Default::default()
    };
    let map = from_sysinfo(&sysinfo);
    assert_eq!(map.len(), 2);
    assert_eq!(map["100"].ip, "10.0.0.1");
    assert_eq!(map["4100"].ip, "10.0.0.3");
    assert!(!map.contains_key("node-a"));
}
