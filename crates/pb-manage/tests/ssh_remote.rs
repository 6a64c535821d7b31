use pb_manage::config::{Config, Overrides};
use pb_manage::remote::{Remote, SshRemote, probe};
use pb_manage::shell::ShellCommand;

// Needs a reachable host: PB_TEST_CONFIG=/path/to/pb.config.json cargo test -- --ignored
#[test]
#[ignore]
fn executes_and_probes_over_real_ssh() {
    let path = std::env::var("PB_TEST_CONFIG").expect("PB_TEST_CONFIG");
    let config = Config::load(path.as_ref(), &Overrides::default()).unwrap();
    let remote = SshRemote::new(&config);

    let out = remote
        .execute(&ShellCommand::new("printf").arg("%s").arg("it's ok"))
        .unwrap();
    assert_eq!(out.stdout, "it's ok");

    assert!(probe(&remote, &ShellCommand::new("test").lit("-d").lit("/")).unwrap());
    assert!(
        !probe(
            &remote,
            &ShellCommand::new("test")
                .lit("-d")
                .arg("/definitely/not/here")
        )
        .unwrap()
    );
}

#[test]
fn unreachable_host_is_a_remote_error() {
    let tmp = tempfile::tempdir().unwrap();
    let cfg_path = tmp.path().join("pb.config.json");
    std::fs::write(
        &cfg_path,
        r#"{ "vpsHost": "127.0.0.1", "sshPort": 1, "sshUser": "nobody", "domain": "example.com",
            "knownHostsFile": "/dev/null", "strictHostKeyChecking": false }"#,
    )
    .unwrap();
    let config = Config::load(&cfg_path, &Overrides::default()).unwrap();
    let remote = SshRemote::new(&config);

    match remote.execute(&ShellCommand::new("true")) {
        Err(pb_manage::Error::Remote { code, command, .. }) => {
            assert_eq!(code, 255);
            assert_eq!(command, "true");
        }
        // No ssh client on this machine.
        Err(pb_manage::Error::Spawn { .. }) => {}
        other => panic!("unexpected result: {other:?}"),
    }
}
