use std::env;
use std::io;
use std::io::Write;
use std::process;

use splitmerge::parse_treebank::{normalize_tree, read_trees_from_file};
use splitmerge::{
  BaselineParser, BinarizationConfig, CkyParser, Err, Parser, ParserConfig, TrainerConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn usage(prog_name: &str) -> String {
  format!(
    r"Usage: {} TREEBANK [options]

Trains on the bracketed trees in TREEBANK, then parses each line typed at the
prompt.

Options:
  -h, --help        Print this message
  -e, --em          Refine the grammar with split-merge EM
  -m, --markov N    Binarize remembering only the last N siblings
  -p, --parent      Mark each phrasal node with its parent's label
  -b, --baseline    Use the baseline parser instead of CKY
  -c, --chart       Print the parse chart (defaults to not printing)",
    prog_name
  )
}

fn parse(parser: &dyn Parser, chart_parser: Option<&CkyParser>, sentence: &str) {
  let sentence = sentence.split_whitespace().collect::<Vec<_>>();

  if let Some(cky) = chart_parser {
    println!("chart:\n{}\n", cky.parse_chart(&sentence));
  }

  match parser.get_best_parse(&sentence) {
    Some(tree) => println!("{}\n", tree.pretty()),
    None => println!("no parse\n"),
  }
}

struct Args {
  filename: String,
  em: bool,
  markov: Option<usize>,
  parent: bool,
  baseline: bool,
  print_chart: bool,
}

impl Args {
  fn make_error_message(msg: &str, prog_name: impl AsRef<str>) -> String {
    format!("argument error: {}.\n\n{}", msg, usage(prog_name.as_ref()))
  }

  fn parse(v: Vec<String>) -> Result<Self, String> {
    let mut iter = v.into_iter();
    let prog_name = match iter.next() {
      Some(name) => name,
      None => {
        return Err(Self::make_error_message(
          "bad argument vector",
          "splitmerge-cli",
        ));
      }
    };

    let mut filename: Option<String> = None;
    let mut em = false;
    let mut markov = None;
    let mut parent = false;
    let mut baseline = false;
    let mut print_chart = false;

    while let Some(o) = iter.next() {
      if o == "-h" || o == "--help" {
        println!("{}", usage(&prog_name));
        process::exit(0);
      } else if o == "-e" || o == "--em" {
        em = true;
      } else if o == "-m" || o == "--markov" {
        match iter.next().map(|n| n.parse::<usize>()) {
          Some(Ok(n)) => markov = Some(n),
          _ => return Err(Self::make_error_message("-m needs a number", prog_name)),
        }
      } else if o == "-p" || o == "--parent" {
        parent = true;
      } else if o == "-b" || o == "--baseline" {
        baseline = true;
      } else if o == "-c" || o == "--chart" {
        print_chart = true;
      } else if filename.is_none() {
        filename = Some(o);
      } else {
        return Err(Self::make_error_message("invalid arguments", prog_name));
      }
    }

    if baseline && (em || print_chart) {
      return Err(Self::make_error_message(
        "the baseline parser has no EM or chart",
        prog_name,
      ));
    }

    if let Some(filename) = filename {
      Ok(Self {
        filename,
        em,
        markov,
        parent,
        baseline,
        print_chart,
      })
    } else {
      Err(Self::make_error_message("missing treebank", prog_name))
    }
  }

  fn parser_config(&self) -> ParserConfig {
    ParserConfig {
      binarization: BinarizationConfig {
        horizontal: self.markov,
        vertical: self.parent,
      },
      ..ParserConfig::default()
    }
  }
}

fn repl(parser: &dyn Parser, chart_parser: Option<&CkyParser>) -> Result<(), Err> {
  let mut input = String::new();
  loop {
    print!("> ");
    io::stdout().flush()?;

    match io::stdin().read_line(&mut input) {
      Ok(_) => {
        if input.is_empty() {
          // ctrl+d
          return Ok(());
        }
        parse(parser, chart_parser, input.trim());
        input.clear();
      }
      Err(error) => return Err(error.into()),
    }
  }
}

fn main() -> Result<(), Err> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .with_writer(io::stderr)
    .init();

  let opts = match Args::parse(env::args().collect()) {
    Ok(opts) => opts,
    Err(msg) => {
      eprintln!("{}", msg);
      process::exit(255);
    }
  };

  let trees = read_trees_from_file(&opts.filename)?
    .iter()
    .filter_map(normalize_tree)
    .collect::<Vec<_>>();
  info!("read {} training trees from {}", trees.len(), opts.filename);

  if opts.baseline {
    return repl(&BaselineParser::new(&trees), None);
  }
  let parser = if opts.em {
    CkyParser::train_em(&trees, opts.parser_config(), TrainerConfig::default())?
  } else {
    CkyParser::train(&trees, opts.parser_config())?
  };
  repl(&parser, opts.print_chart.then_some(&parser))
}
