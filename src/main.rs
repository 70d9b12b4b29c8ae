use clap::{Parser, Subcommand, Args, ValueEnum};
use tracing::{info, Level};

use buypredict::*;
use buypredict::evaluation::{self, CHALLENGE_SESSIONS};
use buypredict::model::{NaiveBayesModel, NaiveBayesParameters, SequenceModel, SequenceParameters, SequenceWeights};
use buypredict::trainer::{DEFAULT_PROGRESS_EVERY, Predictions};

#[derive( Parser )]
#[command( name = "buy_predict", about = "Predicts purchases in clickstream sessions" )]
struct Cli {
    #[command( subcommand )]
    command: Command,

    /// Most verbose level that is logged
    #[arg( long, global = true, default_value_t = Level::INFO )]
    log_level: Level,

    /// Sessions between two progress reports, 0 disables them
    #[arg( long, global = true, default_value_t = DEFAULT_PROGRESS_EVERY )]
    progress_every: usize,
}

#[derive( Subcommand )]
enum Command {
    /// Estimate parameters from click and buy logs
    Train( TrainArgs ),
    /// Predict bought items of the sessions in a click log
    Predict( PredictArgs ),
    /// Score a prediction file against a buy log
    Evaluate( EvaluateArgs ),
}

#[derive( Clone, Copy, ValueEnum )]
enum ModelKind {
    NaiveBayes,
    Sequence,
}

#[derive( Args )]
struct TrainArgs {
    #[arg( long, value_enum )]
    model: ModelKind,
    /// Click log: session,timestamp,item,...
    #[arg( long )]
    clicks: String,
    /// Buy log: session,timestamp,item,...
    #[arg( long )]
    buys: String,
    /// Where the parameters are written
    #[arg( long )]
    output: String,
    /// Count sessions on all cores
    #[arg( long )]
    parallel: bool,
}

#[derive( Args )]
struct PredictArgs {
    #[arg( long, value_enum )]
    model: ModelKind,
    /// Parameters written by `train`
    #[arg( long )]
    parameters: String,
    #[arg( long )]
    clicks: String,
    /// Where the `session;item,item` lines are written
    #[arg( long )]
    output: String,
    #[command( flatten )]
    weights: WeightArgs,
}

#[derive( Args )]
struct WeightArgs {
    /// Weight of the single item estimate in the sequence model
    #[arg( long, default_value_t = 0.3 )]
    single_weight: f64,
    /// Weight of the adjacent pair estimate in the sequence model
    #[arg( long, default_value_t = 0.7 )]
    pair_weight: f64,
}

#[derive( Args )]
struct EvaluateArgs {
    /// Prediction file written by `predict`
    #[arg( long )]
    results: String,
    /// Buy log holding the true purchases
    #[arg( long )]
    buys: String,
    /// Size of the session universe
    #[arg( long, default_value_t = CHALLENGE_SESSIONS )]
    total_sessions: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    prepare_logging( cli.log_level );
    let observer = LogObserver;

    match cli.command {
	Command::Train( args ) => train( args, &observer, cli.progress_every ),
	Command::Predict( args ) => predict( args, &observer, cli.progress_every ),
	Command::Evaluate( args ) => evaluate( args ),
    }
}

fn train( args: TrainArgs, observer: &dyn Observer, progress_every: usize ) -> Result<()> {
    let store = io::read_sessions( &args.clicks, Some( &args.buys ))?;
    let trainer = Trainer::new( observer )
	.with_progress_every( progress_every )
	.with_parallel( args.parallel );

    match args.model {
	ModelKind::NaiveBayes => {
	    let mut model = NaiveBayesModel::new();
	    trainer.train( &store, &mut model )?;
	    io::write_parameters( model.parameters(), &args.output )?;
	},
	ModelKind::Sequence => {
	    let mut model = SequenceModel::default();
	    trainer.train( &store, &mut model )?;
	    io::write_parameters( model.parameters(), &args.output )?;
	},
    }
    info!( "Parameters stored in {}", args.output );
    Ok( () )
}

fn predict( args: PredictArgs, observer: &dyn Observer, progress_every: usize ) -> Result<()> {
    let store = io::read_sessions( &args.clicks, None )?;
    let predictor = Predictor::new( observer ).with_progress_every( progress_every );

    let predictions: Predictions = match args.model {
	ModelKind::NaiveBayes => {
	    let parameters: NaiveBayesParameters = io::read_parameters( &args.parameters )?;
	    let model = NaiveBayesModel::with_parameters( parameters )?;
	    model.log( "loaded model", Level::INFO );
	    predictor.predict( &store, &model )?
	},
	ModelKind::Sequence => {
	    let parameters: SequenceParameters = io::read_parameters( &args.parameters )?;
	    let weights = SequenceWeights::new( args.weights.single_weight, args.weights.pair_weight );
	    let model = SequenceModel::with_parameters( weights, parameters )?;
	    model.log( "loaded model", Level::INFO );
	    predictor.predict( &store, &model )?
	},
    };
    io::write_predictions( &predictions, &args.output )?;
    info!( "Predictions stored in {}", args.output );
    Ok( () )
}

fn evaluate( args: EvaluateArgs ) -> Result<()> {
    let predictions = io::read_predictions( &args.results )?;
    let answers = evaluation::answers_from_store( &io::read_buy_log( &args.buys )? );
    let report = Evaluation::new( args.total_sessions )?.evaluate( &predictions, &answers );
    println!( "score {:.4} (range [{:.4}, {:.4}])", report.score, report.score_range.0, report.score_range.1 );
    println!( "precision {:.6}", report.precision );
    Ok( () )
}

fn prepare_logging( level: Level ) {
    tracing_subscriber::fmt::fmt()
	.with_max_level( level )
	.init();
}
