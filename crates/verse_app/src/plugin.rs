//! Plugins: units of app configuration with a four-phase lifecycle.

use crate::App;
use downcast_rs::{impl_downcast, Downcast};
use variadics_please::all_tuples;

/// A collection of app setup logic.
///
/// Lifecycle: [`build`](Plugin::build) runs when the plugin is added;
/// [`App::run`](crate::App::run) then waits until every plugin reports
/// [`ready`](Plugin::ready), runs [`finish`](Plugin::finish) for each, then
/// [`cleanup`](Plugin::cleanup), and only then enters the main loop.
pub trait Plugin: Downcast + Send + Sync + 'static {
    /// Configures the app: register systems, resources, assets.
    fn build(&self, app: &mut App);

    /// `true` once any asynchronous setup this plugin started has finished.
    fn ready(&self, _app: &App) -> bool {
        true
    }

    /// Runs after every plugin is ready.
    fn finish(&self, _app: &mut App) {}

    /// Runs after every plugin finished, before the main loop.
    fn cleanup(&self, _app: &mut App) {}

    /// Plugin identity for duplicate detection.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// `false` to allow several instances of this plugin.
    fn is_unique(&self) -> bool {
        true
    }
}

impl_downcast!(Plugin);

/// Plain functions act as build-only plugins.
impl<F: Fn(&mut App) + Send + Sync + 'static> Plugin for F {
    fn build(&self, app: &mut App) {
        self(app);
    }
}

/// Where the app currently is in the plugin lifecycle.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum PluginsState {
    /// Plugins are still being added and built.
    Adding,
    /// Every plugin reported ready.
    Ready,
    /// `finish` ran for every plugin.
    Finished,
    /// `cleanup` ran for every plugin.
    Cleaned,
}

/// One or more [`Plugin`]s addable in a single [`App::add_plugins`] call:
/// a plugin value or a tuple of them.
pub trait Plugins<Marker> {
    fn add_to_app(self, app: &mut App);
}

/// Marker for the single-plugin impl.
pub struct PluginMarker;

impl<P: Plugin> Plugins<PluginMarker> for P {
    fn add_to_app(self, app: &mut App) {
        app.add_boxed_plugin(Box::new(self));
    }
}

macro_rules! impl_plugins_tuple {
    ($(#[$meta:meta])* $(($plugin: ident, $marker: ident)),*) => {
        $(#[$meta])*
        #[allow(non_snake_case)]
        impl<$($plugin, $marker),*> Plugins<(($($marker,)*),)> for ($($plugin,)*)
        where
            $($plugin: Plugins<$marker>),*
        {
            #[allow(unused_variables)]
            fn add_to_app(self, app: &mut App) {
                let ($($plugin,)*) = self;
                $($plugin.add_to_app(app);)*
            }
        }
    };
}

all_tuples!(impl_plugins_tuple, 0, 15, P, M);
