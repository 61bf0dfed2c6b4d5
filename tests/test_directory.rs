use std::time::Duration;

use meshbook::config::{Config, SharedConfig};
use meshbook::exporter::{self, ExportOptions, Format};
use meshbook::ldap::{LdapDirectory, SearchRequest};
use meshbook::roster::refresh::Refresher;
use meshbook::roster::{shared_records, shared_runtime_info, shared_updates, sorted_by_name};

const PHONEBOOK: &str = "\
first_name,name,callsign,telephone\n\
Zed,Zulu,K9ZZ,900\n\
Ann,Ng,K1AA,100\n\
Bob,Oslo,K2BB,200\n";

const HOSTS: &str = "\
10.0.0.1\t100\t# phone\n\
10.0.0.7\t700\t# routable, not in roster\n\
10.0.0.8\tnode-a\t# not a phone\n";

fn temp_file(name: &str, contents: &str) -> String {
    let path = std::env::temp_dir().join(format!("meshbook-it-{}-{}", std::process::id(), name));
    std::fs::write(&path, contents).expect("write temp file");
    path.to_string_lossy().to_string()
}

fn config(sources: Vec<String>, olsr_file: String) -> Config {
    Config {
        sources,
        olsr_file,
        include_routable: true,
        active_pfx: "*".to_string(),
        formats: vec!["combined".to_string()],
        ldap_user: "aredn".to_string(),
        ldap_pwd: "aredn".to_string(),
        ..Default::default()
    }
}

fn refresher(config: Config) -> Refresher {
    Refresher {
        client: reqwest::Client::builder()
            .timeout(Duration::from_secs(1))
            .build()
            .expect("client"),
        config: SharedConfig::new(config),
        records: shared_records(),
        runtime_info: shared_runtime_info(),
        updates: shared_updates(),
    }
}

/// Full pipeline: CSV roster + OLSR hosts in, reconciled snapshot out, then
/// the same snapshot rendered as a vendor phonebook and served over the
/// LDAP adapter.
#[tokio::test]
async fn test_roster_to_directory_pipeline() {
    let phonebook = temp_file("roster.csv", PHONEBOOK);
    let hosts = temp_file("hosts", HOSTS);
    let refresher = refresher(config(vec![phonebook.clone()], hosts.clone()));

    refresher.refresh_records().await.expect("refresh");

    // Reconciled snapshot: three roster entries plus one synthesized
    // routable host; node-a is filtered out.
    {
        let records = refresher.records.read().await;
        assert_eq!(records.entries.len(), 4);
        assert!(records.entries[1].is_active()); // Ann has routing data
        assert!(!records.entries[0].is_active()); // Zed has none
        assert_eq!(records.entries[3].phone_number, "700");
    }

    // Exported directory: sorted by name, active entries marked.
    let entries = sorted_by_name(&refresher.records.read().await.entries);
    let options = ExportOptions {
        format: Format::Combined,
        active_pfx: "*".to_string(),
        resolve: true,
        indicate_active: true,
        filter_inactive: false,
    };
    let projected = exporter::project(&entries, &options);
    // the synthesized entry has no name fields and is dropped by projection
    assert_eq!(projected.len(), 3);
    assert_eq!(projected[0].name, "*Ng, Ann (K1AA)");
    assert_eq!(projected[0].telephones, vec!["10.0.0.1", "100"]);
    assert_eq!(projected[1].name, "Oslo, Bob (K2BB)");
    assert_eq!(
        projected[1].telephones,
        vec!["200@200.local.mesh", "200"]
    );

    let body = exporter::exporters()["yealink"]
        .export(&entries, &options)
        .expect("yealink export");
    let xml = String::from_utf8(body).expect("utf-8");
    assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
    assert!(xml.contains("<YealinkIPPhoneDirectory>"));
    assert!(xml.contains("<Name>*Ng, Ann (K1AA)</Name>"));

    // The LDAP adapter sees the same roster.
    let directory = LdapDirectory::new(refresher.config.clone(), refresher.records.clone());
    assert_eq!(directory.bind("aredn", "aredn"), 0);
    let result = directory
        .search(&SearchRequest {
            filter: "(cn=*oslo*)".to_string(),
            ..Default::default()
        })
        .await;
    assert_eq!(result.entries.len(), 1);
    assert!(result.entries[0].dn.starts_with("sn=Oslo Bob (K2BB),"));

    std::fs::remove_file(&phonebook).ok();
    std::fs::remove_file(&hosts).ok();
}

#[tokio::test]
async fn test_export_files_for_all_targets() {
    let phonebook = temp_file("roster-files.csv", PHONEBOOK);
    let outdir = std::env::temp_dir().join(format!("meshbook-it-out-{}", std::process::id()));
    std::fs::create_dir_all(&outdir).expect("outdir");

    let mut cfg = config(vec![phonebook.clone()], String::new());
    cfg.path = outdir.to_string_lossy().to_string();
    cfg.formats = vec!["direct".to_string(), "pbx".to_string()];
    cfg.targets = vec!["generic".to_string(), "vcard".to_string()];
    let refresher = refresher(cfg);

    refresher
        .refresh_records_and_export()
        .await
        .expect("refresh and export");

    for name in [
        "phonebook_generic_direct.xml",
        "phonebook_generic_pbx.xml",
        "phonebook_vcard_direct.vcf",
        "phonebook_vcard_pbx.vcf",
    ] {
        let path = outdir.join(name);
        assert!(path.exists(), "missing export {}", name);
        assert!(std::fs::metadata(&path).expect("metadata").len() > 0);
    }

    std::fs::remove_dir_all(&outdir).ok();
    std::fs::remove_file(&phonebook).ok();
}
