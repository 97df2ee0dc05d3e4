#[macro_use]
extern crate log;

use std::path::Path;

use clap::{App, Arg, SubCommand};

use mediad::backend::{Backend, Command, Event, EventSink};
use mediad::logger;
use mediad::media::TagReader;

struct StdoutSink;

impl EventSink for StdoutSink {
    fn put(&mut self, event: Event) {
        match &event {
            Event::ObjectResponse { .. }
            | Event::ChildrenResponse { .. }
            | Event::ParameterChanged { .. } => {
                println!("{}", serde_json::to_string_pretty(&event).unwrap());
            }
            other => debug!("event: {:?}", other),
        }
    }
}

fn main() {
    let matches = App::new("mediad")
        .version(mediad::MEDIAD_VERSION)
        .arg(
            Arg::with_name("directory")
                .long("directory")
                .help("Database directory")
                .default_value("~/.mediad"),
        )
        .arg(
            Arg::with_name("dir")
                .long("dir")
                .help("Media directory to index; the full set is reconciled against the database")
                .takes_value(true)
                .multiple(true)
                .number_of_values(1),
        )
        .subcommand(SubCommand::with_name("rescan").about("Re-scan all tracked directories"))
        .subcommand(
            SubCommand::with_name("add-dir")
                .about("Add one directory to the index")
                .arg(Arg::with_name("path").required(true)),
        )
        .subcommand(
            SubCommand::with_name("del-dir")
                .about("Remove one directory and its objects")
                .arg(Arg::with_name("path").required(true)),
        )
        .subcommand(
            SubCommand::with_name("browse")
                .about("Resolve one object id")
                .arg(Arg::with_name("id").required(true)),
        )
        .subcommand(
            SubCommand::with_name("list")
                .about("List the children of an object id")
                .arg(Arg::with_name("id").required(true))
                .arg(
                    Arg::with_name("start")
                        .long("start")
                        .takes_value(true)
                        .default_value("0"),
                )
                .arg(
                    Arg::with_name("num")
                        .long("num")
                        .help("0 lists everything")
                        .takes_value(true)
                        .default_value("0"),
                ),
        )
        .get_matches();

    logger::init();

    info!("{}", mediad::MEDIAD_VERSION);

    let directory = shellexpand::tilde(matches.value_of("directory").unwrap()).into_owned();
    let directory = Path::new(&directory);

    std::fs::create_dir_all(directory).expect("can't create directory");

    let mut backend =
        Backend::create(directory, Box::new(TagReader)).expect("can't open database");

    let mut sink = StdoutSink;

    if let Some(dirs) = matches.values_of("dir") {
        backend.handle(
            Command::SetDirs {
                dirs: dirs.map(|d| d.to_string()).collect(),
            },
            &mut sink,
        );
    }

    match matches.subcommand() {
        ("rescan", _) => backend.handle(Command::Rescan, &mut sink),
        ("add-dir", Some(sub)) => backend.handle(
            Command::AddScanDir {
                path: sub.value_of("path").unwrap().to_string(),
            },
            &mut sink,
        ),
        ("del-dir", Some(sub)) => backend.handle(
            Command::DelScanDir {
                path: sub.value_of("path").unwrap().to_string(),
            },
            &mut sink,
        ),
        ("browse", Some(sub)) => backend.handle(
            Command::BrowseObject {
                id: sub.value_of("id").unwrap().to_string(),
            },
            &mut sink,
        ),
        ("list", Some(sub)) => {
            let start = sub
                .value_of("start")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let num = sub
                .value_of("num")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);

            backend.handle(
                Command::BrowseChildren {
                    id: sub.value_of("id").unwrap().to_string(),
                    start,
                    num,
                    one_answer: false,
                },
                &mut sink,
            );
        }
        _ => {}
    }
}
