use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{info, info_span, debug, Level};

use crate::*;

/// Items predicted to be bought, per session. Sessions without such items are absent.
pub type Predictions = BTreeMap<SessionId, Vec<Item>>;

/// Sessions between two progress reports unless configured otherwise
pub const DEFAULT_PROGRESS_EVERY: usize = 10_000;

/// Receives progress reports of long running stages.
pub trait Observer {
    /// Called after every `progress_every` sessions of the stage
    fn observe( &self, stage: &str, processed: usize, total: usize );

    /// Called once when the stage is done
    fn finish( &self, stage: &str, processed: usize ) {
	self.observe( stage, processed, processed );
    }
}

/// Forwards progress to the log
pub struct LogObserver;

/// Swallows progress
pub struct SilentObserver;

/// Estimates model parameters from a corpus of sessions in a single pass.
pub struct Trainer<'o> {
    observer: &'o dyn Observer,
    progress_every: usize,
    parallel: bool,
}

/// Runs a fitted model over unseen sessions.
pub struct Predictor<'o> {
    observer: &'o dyn Observer,
    progress_every: usize,
}

/// Counts processed sessions and reports to the observer at a fixed cadence
struct Progress<'o> {
    observer: &'o dyn Observer,
    stage: &'static str,
    every: usize,
    processed: usize,
    total: usize,
}

impl Observer for LogObserver {
    fn observe( &self, stage: &str, processed: usize, total: usize ) {
	info!( "{stage}: {processed} of {total} sessions" );
    }

    fn finish( &self, stage: &str, processed: usize ) {
	info!( "{stage}: finished after {processed} sessions" );
    }
}

impl Observer for SilentObserver {
    fn observe( &self, _stage: &str, _processed: usize, _total: usize ) {}
}

impl <'o> Progress<'o> {
    fn new( observer: &'o dyn Observer, stage: &'static str, every: usize, total: usize ) -> Progress<'o> {
	Progress { observer, stage, every, processed: 0, total }
    }

    fn tick( &mut self ) {
	self.advance( 1 );
    }

    /// Reports once if a multiple of the cadence was passed
    fn advance( &mut self, sessions: usize ) {
	let before = self.processed;
	self.processed += sessions;
	if self.every > 0 && self.processed / self.every > before / self.every {
	    self.observer.observe( self.stage, self.processed, self.total );
	}
    }

    fn finish( self ) {
	self.observer.finish( self.stage, self.processed );
    }
}

impl <'o> Trainer<'o> {
    pub fn new( observer: &'o dyn Observer ) -> Trainer<'o> {
	Trainer {
	    observer,
	    progress_every: DEFAULT_PROGRESS_EVERY,
	    parallel: false,
	}
    }

    pub fn with_progress_every( mut self, every: usize ) -> Self {
	self.progress_every = every;
	self
    }

    /// Counts the sessions of each progress chunk on all cores
    pub fn with_parallel( mut self, parallel: bool ) -> Self {
	self.parallel = parallel;
	self
    }

    /// Covers every session of the store and fits the model to the accumulated counts
    pub fn train<M>( &self, store: &SessionStore, model: &mut M ) -> Result<()> where
	M: Model + Loggable,
    {
	let _training_span = info_span!( "training", sessions = store.len(), parallel = self.parallel ).entered();
	let cover = if self.parallel {
	    self.cover_parallel::<M>( store )
	} else {
	    self.cover_sequential::<M>( store )
	};
	if cover.is_empty() {
	    info!( "No clicks in the corpus, parameters stay empty" );
	}

	let _fit_span = info_span!( "smoothing" ).entered();
	model.fit( cover )?;
	model.log( "fitted model", Level::INFO );
	Ok( () )
    }

    fn cover_sequential<M: Model>( &self, store: &SessionStore ) -> M::Cover {
	let mut progress = Progress::new( self.observer, "training", self.progress_every, store.len() );
	let mut cover = M::Cover::default();
	for (_, session) in store {
	    cover.add_session( session );
	    progress.tick();
	}
	progress.finish();
	cover
    }

    /// Covers chunks of `progress_every` sessions on the rayon pool, one chunk after the other,
    /// so progress is reported at the same cadence as in the sequential pass
    fn cover_parallel<M: Model>( &self, store: &SessionStore ) -> M::Cover {
	let sessions: Vec<&Session> = store.iter().map( |(_, session)| session ).collect();
	debug!( "Covering {} sessions on {} threads", sessions.len(), rayon::current_num_threads() );
	let chunk_size = match self.progress_every {
	    0 => sessions.len().max( 1 ),
	    every => every,
	};

	let mut progress = Progress::new( self.observer, "training", self.progress_every, sessions.len() );
	let mut cover = M::Cover::default();
	for chunk in sessions.chunks( chunk_size ) {
	    let chunk_cover = chunk.par_iter()
		.fold( M::Cover::default, |mut cover, session| {
		    cover.add_session( session );
		    cover
		})
		.reduce( M::Cover::default, |mut left, right| {
		    left.merge( right );
		    left
		});
	    cover.merge( chunk_cover );
	    progress.advance( chunk.len() );
	}
	progress.finish();
	cover
    }
}

impl <'o> Predictor<'o> {
    pub fn new( observer: &'o dyn Observer ) -> Predictor<'o> {
	Predictor { observer, progress_every: DEFAULT_PROGRESS_EVERY }
    }

    pub fn with_progress_every( mut self, every: usize ) -> Self {
	self.progress_every = every;
	self
    }

    /// Predicts the bought items of every session in the store; buys in the store are ignored
    pub fn predict<M: Model>( &self, store: &SessionStore, model: &M ) -> Result<Predictions> {
	let _span = info_span!( "prediction", sessions = store.len() ).entered();
	let mut progress = Progress::new( self.observer, "prediction", self.progress_every, store.len() );
	let mut predictions = Predictions::new();
	for (id, session) in store {
	    let bought = model.predict( &session.clicks )?;
	    if !bought.is_empty() {
		predictions.insert( id.clone(), bought );
	    }
	    progress.tick();
	}
	progress.finish();
	info!( "{} of {} sessions predicted to buy", predictions.len(), store.len() );
	Ok( predictions )
    }
}

#[cfg(test)]
mod test {
    use std::cell::RefCell;

    use super::*;
    use crate::model::{SequenceModel, NaiveBayesModel};

    #[derive( Default )]
    struct RecordingObserver {
	reports: RefCell<Vec<(String, usize)>>,
    }

    impl Observer for RecordingObserver {
	fn observe( &self, stage: &str, processed: usize, _total: usize ) {
	    self.reports.borrow_mut().push( (stage.to_string(), processed) );
	}
    }

    fn corpus() -> SessionStore {
	let mut store = SessionStore::new();
	let records = vec!(
	    ("1", vec!( ("A", 1), ("B", 2), ("A", 3) ), vec!( ("A", 4) )),
	    ("2", vec!( ("B", 1), ("C", 2) ), vec!() ),
	    ("3", vec!( ("A", 1) ), vec!( ("A", 2) )),
	    ("4", vec!( ("C", 1), ("A", 2), ("C", 3) ), vec!( ("C", 9) )),
	    ("5", vec!(), vec!( ("D", 1) )),
	);
	for (id, clicks, buys) in records {
	    store.insert( id, Session::new(
		clicks.into_iter().map( |(item, time)| ClickEvent::new( item, time )).collect(),
		buys.into_iter().map( |(item, time)| BuyEvent::new( item, time )).collect(),
	    ));
	}
	store
    }

    #[test]
    /// Progress arrives at the configured cadence plus once at the end
    fn test_progress_cadence() {
	let observer = RecordingObserver::default();
	let trainer = Trainer::new( &observer ).with_progress_every( 2 );
	let mut model = SequenceModel::default();
	trainer.train( &corpus(), &mut model ).unwrap();

	let reports = observer.reports.borrow();
	let processed: Vec<usize> = reports.iter().map( |(_, n)| *n ).collect();
	assert_eq!( processed, vec!( 2, 4, 5 ));
	assert!( reports.iter().all( |(stage, _)| stage == "training" ));
    }

    #[test]
    /// The parallel pass reports at the same cadence as the sequential one
    fn test_parallel_progress_cadence() {
	let observer = RecordingObserver::default();
	let trainer = Trainer::new( &observer ).with_progress_every( 2 ).with_parallel( true );
	let mut model = NaiveBayesModel::new();
	trainer.train( &corpus(), &mut model ).unwrap();

	let processed: Vec<usize> = observer.reports.borrow().iter().map( |(_, n)| *n ).collect();
	assert_eq!( processed, vec!( 2, 4, 5 ));

	let observer = RecordingObserver::default();
	let trainer = Trainer::new( &observer ).with_progress_every( 0 ).with_parallel( true );
	trainer.train( &corpus(), &mut model ).unwrap();
	assert_eq!( observer.reports.borrow().len(), 1 );
    }

    #[test]
    fn test_parallel_matches_sequential() {
	let store = corpus();
	let observer = SilentObserver;

	let mut sequential = SequenceModel::default();
	Trainer::new( &observer ).train( &store, &mut sequential ).unwrap();
	let mut parallel = SequenceModel::default();
	Trainer::new( &observer ).with_parallel( true ).train( &store, &mut parallel ).unwrap();
	assert_eq!( sequential.parameters(), parallel.parameters() );

	let mut sequential = NaiveBayesModel::new();
	Trainer::new( &observer ).train( &store, &mut sequential ).unwrap();
	let mut parallel = NaiveBayesModel::new();
	Trainer::new( &observer ).with_parallel( true ).train( &store, &mut parallel ).unwrap();
	assert_eq!( sequential.parameters(), parallel.parameters() );
    }

    #[test]
    fn test_train_and_predict() {
	let store = corpus();
	let observer = SilentObserver;
	let mut model = SequenceModel::default();
	Trainer::new( &observer ).train( &store, &mut model ).unwrap();

	// A is clicked twice without and twice with a later buy
	assert_eq!( model.parameters().single( "A" ), [3, 3] );
	assert_eq!( model.parameters().single( "C" ), [3, 2] );

	let predictions = Predictor::new( &observer ).predict( &store, &model ).unwrap();
	for items in predictions.values() {
	    assert!( !items.is_empty() );
	}
	// deterministic
	let again = Predictor::new( &observer ).predict( &store, &model ).unwrap();
	assert_eq!( predictions, again );
    }

    #[test]
    fn test_empty_corpus() {
	let observer = SilentObserver;
	let mut model = NaiveBayesModel::new();
	Trainer::new( &observer ).train( &SessionStore::new(), &mut model ).unwrap();
	assert_eq!( model.parameters().number_items(), 0 );

	let predictions = Predictor::new( &observer ).predict( &corpus(), &model ).unwrap();
	assert!( predictions.is_empty() );
    }
}
