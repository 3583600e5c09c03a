#[cfg(test)]
mod tests {
    use burn::backend::NdArray;
    use burn::prelude::*;

    use crate::config::{
        AsppParams, DecoderSelection, DecoderType, FpnParams, ModelConfig, MrfmParams,
        NasFpnParams, NormActivationConfig,
    };
    use crate::error::DecoderError;
    use crate::models::{build_decoder, decoder_config, Decoder, DecoderModuleConfig, L2Regularizer};
    use crate::specs::{FeatureMaps, FeatureSpec, InputSpecs};
    use crate::ActivationKind;

    type TestBackend = NdArray;

    fn input_specs() -> InputSpecs {
        InputSpecs::from([
            ("3".to_string(), FeatureSpec::new(8).with_size(32, 32)),
            ("4".to_string(), FeatureSpec::new(16).with_size(16, 16)),
            ("5".to_string(), FeatureSpec::new(32).with_size(8, 8)),
        ])
    }

    fn features(device: &<TestBackend as Backend>::Device) -> FeatureMaps<TestBackend> {
        input_specs()
            .into_iter()
            .map(|(level, spec)| {
                let tensor = Tensor::ones(
                    [1, spec.channels, spec.height.unwrap(), spec.width.unwrap()],
                    device,
                );
                (level, tensor)
            })
            .collect()
    }

    fn norm_activation() -> NormActivationConfig {
        NormActivationConfig::new()
            .with_activation("swish".to_string())
            .with_use_sync_bn(true)
            .with_norm_momentum(0.997)
            .with_norm_epsilon(1e-4)
    }

    fn model_config(decoder: DecoderSelection) -> ModelConfig {
        ModelConfig::new()
            .with_decoder(decoder)
            .with_norm_activation(norm_activation())
    }

    #[test]
    fn test_unknown_decoder_error() {
        let config = model_config(DecoderSelection::new().with_decoder_type("unet".to_string()));

        match decoder_config(&input_specs(), &config, None) {
            Err(DecoderError::UnknownDecoder { decoder }) => assert_eq!(decoder, "unet"),
            other => panic!("Expected UnknownDecoder error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_decoder_message() {
        let config = model_config(DecoderSelection::new().with_decoder_type("bifpn".to_string()));

        let error = build_decoder::<TestBackend>(&input_specs(), &config, None, &Default::default())
            .unwrap_err();
        assert_eq!(error.to_string(), "Decoder 'bifpn' not implemented");
    }

    #[test]
    fn test_identity_returns_none() {
        // The identity decoder reads nothing else, not even the activation.
        let config = ModelConfig::new()
            .with_decoder(DecoderSelection::select(DecoderType::Identity))
            .with_norm_activation(NormActivationConfig::new().with_activation("mish".to_string()));

        assert!(decoder_config(&input_specs(), &config, None).unwrap().is_none());
        let decoder =
            build_decoder::<TestBackend>(&input_specs(), &config, None, &Default::default())
                .unwrap();
        assert!(decoder.is_none());
    }

    #[test]
    fn test_fpn_fields_are_forwarded() {
        let config = model_config(
            DecoderSelection::select(DecoderType::Fpn).with_fpn(
                FpnParams::new()
                    .with_num_filters(64)
                    .with_use_separable_conv(true),
            ),
        )
        .with_min_level(3)
        .with_max_level(6);
        let regularizer = L2Regularizer::new(5e-5);

        let Some(DecoderModuleConfig::Fpn(fpn)) =
            decoder_config(&input_specs(), &config, Some(regularizer)).unwrap()
        else {
            panic!("Expected an FPN config");
        };
        assert_eq!(fpn.input_specs, input_specs());
        assert_eq!(fpn.min_level, 3);
        assert_eq!(fpn.max_level, 6);
        assert_eq!(fpn.num_filters, 64);
        assert!(fpn.use_separable_conv);
        assert_eq!(fpn.activation, ActivationKind::Swish);
        assert!(fpn.norm.use_sync_bn);
        assert_eq!(fpn.norm.momentum, 0.997);
        assert_eq!(fpn.norm.epsilon, 1e-4);
        assert_eq!(fpn.kernel_regularizer.map(|r| r.l2), Some(5e-5));
    }

    #[test]
    fn test_nasfpn_fields_are_forwarded() {
        let config = model_config(
            DecoderSelection::select(DecoderType::NasFpn).with_nasfpn(
                NasFpnParams::new()
                    .with_num_filters(32)
                    .with_num_repeats(3),
            ),
        );

        let Some(DecoderModuleConfig::NasFpn(nasfpn)) =
            decoder_config(&input_specs(), &config, None).unwrap()
        else {
            panic!("Expected a NAS-FPN config");
        };
        assert_eq!(nasfpn.input_specs, input_specs());
        assert_eq!((nasfpn.min_level, nasfpn.max_level), (3, 7));
        assert_eq!(nasfpn.num_filters, 32);
        assert_eq!(nasfpn.num_repeats, 3);
        assert!(!nasfpn.use_separable_conv);
        assert_eq!(nasfpn.activation, ActivationKind::Swish);
        assert_eq!(nasfpn.norm.momentum, 0.997);
        assert!(nasfpn.kernel_regularizer.is_none());
    }

    #[test]
    fn test_aspp_fields_are_forwarded() {
        let config = model_config(
            DecoderSelection::select(DecoderType::Aspp).with_aspp(
                AsppParams::new()
                    .with_level(5)
                    .with_dilation_rates(vec![6, 12, 18])
                    .with_num_filters(128)
                    .with_pool_kernel_size(Some([4, 4]))
                    .with_dropout_rate(0.3),
            ),
        );

        let Some(DecoderModuleConfig::Aspp(aspp)) =
            decoder_config(&input_specs(), &config, Some(L2Regularizer::new(1e-4))).unwrap()
        else {
            panic!("Expected an ASPP config");
        };
        assert_eq!(aspp.level, 5);
        assert_eq!(aspp.dilation_rates, vec![6, 12, 18]);
        assert_eq!(aspp.num_filters, 128);
        assert_eq!(aspp.pool_kernel_size, Some([4, 4]));
        assert_eq!(aspp.dropout_rate, 0.3);
        assert_eq!(aspp.activation, ActivationKind::Swish);
        assert!(aspp.norm.use_sync_bn);
        assert_eq!(aspp.norm.epsilon, 1e-4);
        assert!(aspp.kernel_regularizer.is_some());
    }

    #[test]
    fn test_mrfm_fields_are_forwarded() {
        let config = model_config(
            DecoderSelection::select(DecoderType::Mrfm).with_mrfm(
                MrfmParams::new()
                    .with_fml_from_layer(vec!["4".into(), "5".into(), "".into()])
                    .with_fml_layer_depth(vec![-1, -1, 128])
                    .with_depth_multiplier(0.5)
                    .with_min_depth(8)
                    .with_insert_1x1_conv(false)
                    .with_kernel_size(5)
                    .with_use_explicit_padding(true)
                    .with_use_depthwise(true),
            ),
        );

        let Some(DecoderModuleConfig::Mrfm(mrfm)) =
            decoder_config(&input_specs(), &config, None).unwrap()
        else {
            panic!("Expected an MRFM config");
        };
        assert_eq!(mrfm.input_specs, input_specs());
        assert_eq!(mrfm.feature_map_layout.from_layer, ["4", "5", ""]);
        assert_eq!(mrfm.feature_map_layout.layer_depth, [-1, -1, 128]);
        assert_eq!(mrfm.depth_multiplier, 0.5);
        assert_eq!(mrfm.min_depth, 8);
        assert!(!mrfm.insert_1x1_conv);
        assert_eq!(mrfm.kernel_size, 5);
        assert!(mrfm.use_explicit_padding);
        assert!(mrfm.use_depthwise);
        assert_eq!(mrfm.activation, ActivationKind::Swish);
        assert_eq!(mrfm.norm.momentum, 0.997);
    }

    #[test]
    fn test_each_type_routes_to_its_decoder() {
        let device = Default::default();
        let selections = [
            DecoderSelection::select(DecoderType::Fpn)
                .with_fpn(FpnParams::new().with_num_filters(8)),
            DecoderSelection::select(DecoderType::NasFpn)
                .with_nasfpn(NasFpnParams::new().with_num_filters(8).with_num_repeats(1)),
            DecoderSelection::select(DecoderType::Aspp).with_aspp(
                AsppParams::new()
                    .with_dilation_rates(vec![2])
                    .with_num_filters(8),
            ),
            DecoderSelection::select(DecoderType::Mrfm).with_mrfm(
                MrfmParams::new()
                    .with_fml_from_layer(vec!["4".into(), "5".into(), "".into()])
                    .with_fml_layer_depth(vec![-1, -1, 32]),
            ),
        ];

        for selection in selections {
            let expected = selection.kind().unwrap();
            let config = model_config(selection);
            let decoder: Decoder<TestBackend> =
                build_decoder(&input_specs(), &config, None, &device)
                    .unwrap()
                    .unwrap();
            assert_eq!(decoder.decoder_type(), expected);

            let outputs = decoder.forward(features(&device)).unwrap();
            assert_eq!(
                outputs.keys().collect::<Vec<_>>(),
                decoder.output_specs().keys().collect::<Vec<_>>()
            );
            for (level, tensor) in &outputs {
                assert_eq!(tensor.dims()[1], decoder.output_specs()[level].channels);
            }
            assert!(decoder.regularization_loss().is_none());
        }
    }

    #[test]
    fn test_regularizer_is_wired_in() {
        let config = model_config(
            DecoderSelection::select(DecoderType::Fpn)
                .with_fpn(FpnParams::new().with_num_filters(4)),
        );
        let decoder = build_decoder::<TestBackend>(
            &input_specs(),
            &config,
            Some(L2Regularizer::new(1e-2)),
            &Default::default(),
        )
        .unwrap()
        .unwrap();

        let loss: f32 = decoder.regularization_loss().unwrap().into_scalar();
        assert!(loss > 0.0);
    }

    #[test]
    fn test_unsupported_activation() {
        let config = ModelConfig::new()
            .with_decoder(DecoderSelection::select(DecoderType::Fpn))
            .with_norm_activation(NormActivationConfig::new().with_activation("mish".to_string()));

        match decoder_config(&input_specs(), &config, None) {
            Err(DecoderError::UnsupportedActivation { activation }) => {
                assert_eq!(activation, "mish");
            }
            other => panic!("Expected UnsupportedActivation error, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_level_range() {
        let config = ModelConfig::new()
            .with_decoder(DecoderSelection::select(DecoderType::Fpn))
            .with_min_level(6)
            .with_max_level(4);

        match config.validate() {
            Err(DecoderError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("min_level (6) must not exceed max_level (4)"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn test_aspp_ignores_level_range() {
        let config = model_config(DecoderSelection::select(DecoderType::Aspp))
            .with_min_level(6)
            .with_max_level(4);

        match decoder_config(&input_specs(), &config, None).unwrap() {
            Some(DecoderModuleConfig::Aspp(aspp)) => assert_eq!(aspp.level, 4),
            other => panic!("Expected Aspp config, got {other:?}"),
        }
    }

    #[test]
    fn test_mrfm_layout_length_mismatch() {
        let config = ModelConfig::new().with_decoder(
            DecoderSelection::select(DecoderType::Mrfm)
                .with_mrfm(MrfmParams::new().with_fml_layer_depth(vec![-1, -1])),
        );

        match config.validate() {
            Err(DecoderError::InvalidConfiguration { reason }) => {
                assert!(reason.contains("layout lengths differ"));
            }
            _ => panic!("Expected InvalidConfiguration error"),
        }
    }

    #[test]
    fn test_config_json_round_trip() {
        let config = model_config(
            DecoderSelection::select(DecoderType::Aspp)
                .with_aspp(AsppParams::new().with_dilation_rates(vec![6, 12])),
        );

        let json = serde_json::to_string(&config).unwrap();
        let loaded: ModelConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.decoder.kind().unwrap(), DecoderType::Aspp);
        assert_eq!(loaded.decoder.aspp.dilation_rates, vec![6, 12]);
        assert_eq!(loaded.norm_activation.activation, "swish");
    }

    #[test]
    fn test_unknown_decoder_from_json() {
        let config = model_config(DecoderSelection::select(DecoderType::Fpn));
        let json = serde_json::to_string(&config)
            .unwrap()
            .replace("\"decoder_type\":\"fpn\"", "\"decoder_type\":\"retina\"");
        let loaded: ModelConfig = serde_json::from_str(&json).unwrap();

        assert!(matches!(
            decoder_config(&input_specs(), &loaded, None),
            Err(DecoderError::UnknownDecoder { .. })
        ));
    }
}
