use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use clap::{value_t, values_t, App, AppSettings, Arg, ArgMatches, SubCommand};

use netinf::algo::Algorithm;
use netinf::cl::udp::UdpConfig;

pub enum Command {
    Hash {
        path: PathBuf,
    },
    Get {
        name: String,
        via: Option<String>,
    },
    Publish {
        name: String,
        to: String,
        file: Option<PathBuf>,
        locators: Vec<String>,
    },
    Search {
        tokens: String,
        to: String,
    },
    Resolve {
        name: String,
    },
    Listen,
    Nrs {
        server: String,
        action: NrsAction,
    },
}

pub enum NrsAction {
    Register {
        key: String,
        hints: Vec<String>,
    },
    Lookup {
        key: String,
    },
    List,
}

pub struct Settings {
    pub store: PathBuf,
    pub tables: Option<PathBuf>,
    pub timeout: Duration,
    pub retries: u32,
    pub algorithm: Algorithm,
    pub authority: Option<String>,
    pub udp: UdpConfig,
    pub command: Command,
}

const STORE_DIR: &str = ".netinf";
const TIMEOUT_SECS: u64 = 30;

impl Settings {
    pub fn new(command: Command) -> Settings {
        Settings {
            store: PathBuf::from(STORE_DIR),
            tables: None,
            timeout: Duration::from_secs(TIMEOUT_SECS),
            retries: 1,
            algorithm: Algorithm::default(),
            authority: None,
            udp: UdpConfig::default(),
            command,
        }
    }

    fn bind_from_args(&mut self, arg: &ArgMatches) -> Result<(), clap::Error> {
        if let Some(v) = arg.value_of("store") {
            self.store = PathBuf::from(v);
        }
        if let Some(v) = arg.value_of("tables") {
            self.tables = Some(PathBuf::from(v));
        }
        if arg.is_present("timeout") {
            self.timeout = Duration::from_secs(value_t!(arg, "timeout", u64)?);
        }
        if arg.is_present("retries") {
            self.retries = value_t!(arg, "retries", u32)?;
        }
        if arg.is_present("algorithm") {
            self.algorithm = value_t!(arg, "algorithm", Algorithm)?;
        }
        if let Some(v) = arg.value_of("authority") {
            self.authority = Some(v.to_string());
        }
        if arg.is_present("group") {
            self.udp.target.set_ip(value_t!(arg, "group", Ipv4Addr)?);
        }
        if arg.is_present("udp-port") {
            let port = value_t!(arg, "udp-port", u16)?;
            self.udp.target.set_port(port);
            self.udp.bind.set_port(port);
        }
        if arg.is_present("udp-bind") {
            self.udp.bind = value_t!(arg, "udp-bind", SocketAddrV4)?;
        }
        Ok(())
    }

    fn command_from_args(arg: &ArgMatches) -> Result<Command, clap::Error> {
        let command = match arg.subcommand() {
            ("hash", Some(m)) => Command::Hash {
                path: PathBuf::from(value_t!(m, "file", String)?),
            },
            ("get", Some(m)) => Command::Get {
                name: value_t!(m, "name", String)?,
                via: m.value_of("via").map(String::from),
            },
            ("publish", Some(m)) => Command::Publish {
                name: value_t!(m, "name", String)?,
                to: value_t!(m, "to", String)?,
                file: m.value_of("file").map(PathBuf::from),
                locators: if m.is_present("loc") { values_t!(m, "loc", String)? } else { vec![] },
            },
            ("search", Some(m)) => Command::Search {
                tokens: value_t!(m, "tokens", String)?,
                to: value_t!(m, "to", String)?,
            },
            ("resolve", Some(m)) => Command::Resolve {
                name: value_t!(m, "name", String)?,
            },
            ("nrs", Some(m)) => {
                let action = match m.subcommand() {
                    ("register", Some(r)) => NrsAction::Register {
                        key: value_t!(r, "key", String)?,
                        hints: values_t!(r, "hint", String)?,
                    },
                    ("lookup", Some(r)) => NrsAction::Lookup {
                        key: value_t!(r, "key", String)?,
                    },
                    _ => NrsAction::List,
                };
                Command::Nrs {
                    server: value_t!(m, "server", String)?,
                    action,
                }
            },
            _ => Command::Listen,
        };
        Ok(command)
    }

    pub fn app() -> App<'static, 'static> {
        let mut o = App::new("netinf");
        o = o.version(env!("CARGO_PKG_VERSION"));
        o = o.about("Name, find and move NetInf objects");
        o = o.setting(AppSettings::SubcommandRequiredElseHelp);
        o = o.arg(
            Arg::with_name("store")
                .long("store")
                .short("s")
                .value_name("Directory of the local object store")
                .takes_value(true)
                .global(true),
        );
        o = o.arg(
            Arg::with_name("tables")
                .long("tables")
                .short("t")
                .value_name("Table file with routes, maps and mounts")
                .takes_value(true)
                .global(true),
        );
        o = o.arg(
            Arg::with_name("timeout")
                .long("timeout")
                .value_name("Transport timeout in seconds")
                .takes_value(true)
                .global(true),
        );
        o = o.arg(
            Arg::with_name("retries")
                .long("retries")
                .value_name("Attempts for transport operations")
                .takes_value(true)
                .global(true),
        );
        o = o.arg(
            Arg::with_name("algorithm")
                .long("algorithm")
                .short("a")
                .value_name("Hash suite for new names")
                .takes_value(true)
                .global(true),
        );
        o = o.arg(
            Arg::with_name("authority")
                .long("authority")
                .value_name("Authority for new names")
                .takes_value(true)
                .global(true),
        );
        o = o.arg(
            Arg::with_name("udp-bind")
                .long("udp-bind")
                .value_name("Local address of the udp layer")
                .takes_value(true)
                .global(true),
        );
        o = o.arg(
            Arg::with_name("group")
                .long("group")
                .value_name("Multicast group of the udp layer")
                .takes_value(true)
                .global(true),
        );
        o = o.arg(
            Arg::with_name("udp-port")
                .long("udp-port")
                .value_name("Port of the multicast group")
                .takes_value(true)
                .global(true),
        );

        o = o.subcommand(
            SubCommand::with_name("hash")
                .about("Print the names of a file")
                .arg(Arg::with_name("file").required(true).index(1)),
        );
        o = o.subcommand(
            SubCommand::with_name("get")
                .about("Fetch an object over http")
                .arg(Arg::with_name("name").required(true).index(1))
                .arg(
                    Arg::with_name("via")
                        .long("via")
                        .value_name("Next hop, host[:port]")
                        .takes_value(true),
                ),
        );
        o = o.subcommand(
            SubCommand::with_name("publish")
                .about("Publish an object or its locators")
                .arg(Arg::with_name("name").required(true).index(1))
                .arg(
                    Arg::with_name("to")
                        .long("to")
                        .value_name("Destination url, e.g. nihttp://host:port")
                        .takes_value(true)
                        .required(true),
                )
                .arg(
                    Arg::with_name("file")
                        .long("file")
                        .short("f")
                        .value_name("Object octets")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("loc")
                        .long("loc")
                        .value_name("Locator")
                        .takes_value(true)
                        .multiple(true)
                        .number_of_values(1),
                ),
        );
        o = o.subcommand(
            SubCommand::with_name("search")
                .about("Search for objects")
                .arg(Arg::with_name("tokens").required(true).index(1))
                .arg(
                    Arg::with_name("to")
                        .long("to")
                        .value_name("Destination url")
                        .takes_value(true)
                        .required(true),
                ),
        );
        o = o.subcommand(
            SubCommand::with_name("resolve")
                .about("Resolve a name with the local tables")
                .arg(Arg::with_name("name").required(true).index(1)),
        );
        o = o.subcommand(SubCommand::with_name("listen").about("Answer udp GET requests from the local tables"));
        o = o.subcommand(
            SubCommand::with_name("nrs")
                .about("Register and look up routing hints at a name resolution service")
                .setting(AppSettings::SubcommandRequiredElseHelp)
                .arg(
                    Arg::with_name("server")
                        .long("server")
                        .value_name("Service, host[:port] or base url")
                        .takes_value(true)
                        .required(true),
                )
                .subcommand(
                    SubCommand::with_name("register")
                        .about("Store routing hints for a name or authority")
                        .arg(Arg::with_name("key").required(true).index(1))
                        .arg(
                            Arg::with_name("hint")
                                .long("hint")
                                .value_name("Next hop, host[:port]")
                                .takes_value(true)
                                .required(true)
                                .multiple(true)
                                .number_of_values(1),
                        ),
                )
                .subcommand(
                    SubCommand::with_name("lookup")
                        .about("Print the next hops for a name or authority")
                        .arg(Arg::with_name("key").required(true).index(1)),
                )
                .subcommand(SubCommand::with_name("list").about("Print every entry")),
        );
        o
    }

    pub fn from_matches(arg_matches: &ArgMatches) -> Result<Settings, clap::Error> {
        let command = Settings::command_from_args(arg_matches)?;
        let mut settings = Settings::new(command);
        settings.bind_from_args(arg_matches)?;
        // global options given after the subcommand land in its matches
        if let (_, Some(sub)) = arg_matches.subcommand() {
            settings.bind_from_args(sub)?;
        }
        Ok(settings)
    }

    pub fn from_args() -> Settings {
        let arg_matches = Settings::app().get_matches();
        match Settings::from_matches(&arg_matches) {
            Ok(v) => v,
            Err(e) => e.exit(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddrV4};
    use std::path::PathBuf;
    use std::time::Duration;

    use netinf::algo::Algorithm;

    use super::{Command, NrsAction, Settings};

    fn settings(args: &[&str]) -> Settings {
        let m = Settings::app().get_matches_from_safe(args).unwrap();
        Settings::from_matches(&m).unwrap()
    }

    #[test]
    fn test_defaults() {
        let s = settings(&["netinf", "listen"]);
        assert_eq!(s.store, PathBuf::from(".netinf"));
        assert_eq!(s.timeout, Duration::from_secs(30));
        assert_eq!(s.algorithm, Algorithm::Sha256);
        assert_eq!(s.udp.target, SocketAddrV4::new(Ipv4Addr::new(225, 4, 5, 6), 2345));
        assert!(matches!(s.command, Command::Listen));
    }

    #[test]
    fn test_publish() {
        let s = settings(&[
            "netinf",
            "publish",
            "ni:///sha-256;x",
            "--to",
            "nihttp://peer:8080",
            "--loc",
            "http://a/x",
            "--loc",
            "http://b/x",
            "--algorithm",
            "sha-256-32",
            "--udp-port",
            "3000",
        ]);
        assert_eq!(s.algorithm, Algorithm::Sha256Trunc32);
        assert_eq!(s.udp.bind.port(), 3000);
        match s.command {
            Command::Publish {
                to,
                locators,
                file,
                ..
            } => {
                assert_eq!(to, "nihttp://peer:8080");
                assert_eq!(locators.len(), 2);
                assert!(file.is_none());
            },
            _ => panic!("expected publish"),
        }
    }

    #[test]
    fn test_nrs() {
        let s = settings(&[
            "netinf",
            "nrs",
            "--server",
            "village.n4c.eu",
            "register",
            "example.com",
            "--hint",
            "a.example.com",
            "--hint",
            "b.example.com:8080",
        ]);
        match s.command {
            Command::Nrs {
                server,
                action: NrsAction::Register {
                    key,
                    hints,
                },
            } => {
                assert_eq!(server, "village.n4c.eu");
                assert_eq!(key, "example.com");
                assert_eq!(hints, vec![String::from("a.example.com"), String::from("b.example.com:8080")]);
            },
            _ => panic!("expected nrs register"),
        }
        let s = settings(&["netinf", "nrs", "--server", "village.n4c.eu", "list"]);
        assert!(matches!(s.command, Command::Nrs { action: NrsAction::List, .. }));
        assert!(Settings::app().get_matches_from_safe(&["netinf", "nrs", "list"]).is_err());
    }

    #[test]
    fn test_bad_values() {
        let m = Settings::app()
            .get_matches_from_safe(&["netinf", "hash", "x", "--algorithm", "md5"])
            .unwrap();
        assert!(Settings::from_matches(&m).is_err());
        assert!(Settings::app().get_matches_from_safe(&["netinf"]).is_err());
    }
}
